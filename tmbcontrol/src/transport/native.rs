//! Native messaging host launcher.
//!
//! Locates the host manifest the same way the browser does, checks it, and
//! starts the host program with its stdio as the transport channel.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::{HostConnection, HostConnector};
use crate::config_ext::BridgeSettings;
use crate::errors::BridgeError;

/// `<name>.json` manifest describing a native messaging host.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct HostManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,
}

/// Standard per-user and system manifest directories.
pub fn standard_manifest_dirs() -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Some(home) = dirs::home_dir() {
        found.push(home.join(".mozilla").join("native-messaging-hosts"));
    }
    found.push(PathBuf::from("/usr/lib/mozilla/native-messaging-hosts"));
    found.push(PathBuf::from("/usr/lib64/mozilla/native-messaging-hosts"));
    if let Some(home) = dirs::home_dir() {
        found.push(
            home.join("Library")
                .join("Application Support")
                .join("Mozilla")
                .join("NativeMessagingHosts"),
        );
    }
    found
}

#[derive(Clone, Debug)]
pub struct NativeHostConnector {
    host_name: String,
    extension_id: Option<String>,
    manifest_dirs: Vec<PathBuf>,
    search_standard_dirs: bool,
}

impl NativeHostConnector {
    pub fn new(host_name: impl Into<String>, extension_id: Option<String>) -> Self {
        Self {
            host_name: host_name.into(),
            extension_id,
            manifest_dirs: Vec::new(),
            search_standard_dirs: true,
        }
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(settings.host_name.clone(), settings.extension_id.clone())
            .with_manifest_dirs(settings.manifest_dirs.clone())
    }

    /// Directories searched before the standard ones.
    pub fn with_manifest_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.manifest_dirs = dirs;
        self
    }

    /// Restricts the search to the configured directories.
    pub fn only_configured_dirs(mut self) -> Self {
        self.search_standard_dirs = false;
        self
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        let mut found = self.manifest_dirs.clone();
        if self.search_standard_dirs {
            found.extend(standard_manifest_dirs());
        }
        found
    }

    /// Path of the first `<host_name>.json` found.
    pub fn locate_manifest(&self) -> Result<PathBuf, BridgeError> {
        let file_name = format!("{}.json", self.host_name);
        self.search_dirs()
            .into_iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| BridgeError::manifest(format!("{file_name} not found")))
    }

    /// Reads a manifest and returns it with the resolved host executable.
    pub async fn load_manifest(&self, path: &Path) -> Result<(HostManifest, PathBuf), BridgeError> {
        let text = tokio::fs::read_to_string(path).await?;
        let manifest: HostManifest = serde_json::from_str(&text)?;
        let program = self.validate(&manifest, path)?;
        Ok((manifest, program))
    }

    fn validate(&self, manifest: &HostManifest, path: &Path) -> Result<PathBuf, BridgeError> {
        if manifest.name != self.host_name {
            return Err(BridgeError::manifest(format!(
                "{} declares host '{}'",
                path.display(),
                manifest.name
            )));
        }
        if manifest.kind != "stdio" {
            return Err(BridgeError::manifest(format!(
                "unsupported host type '{}'",
                manifest.kind
            )));
        }
        if let (Some(allowed), Some(id)) = (&manifest.allowed_extensions, &self.extension_id) {
            if !allowed.iter().any(|a| a == id) {
                return Err(BridgeError::manifest(format!("extension {id} is not allowed")));
            }
        }

        let Some(program) = &manifest.path else {
            return Err(BridgeError::manifest("missing 'path'"));
        };
        // relative paths are relative to the manifest
        if program.is_absolute() {
            Ok(program.clone())
        } else {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            Ok(base.join(program))
        }
    }

    async fn spawn(&self) -> Result<HostConnection, BridgeError> {
        let manifest_path = self.locate_manifest()?;
        let (_, program) = self.load_manifest(&manifest_path).await?;
        debug!("Starting native host {}", program.display());

        let mut child = Command::new(&program)
            .arg(&manifest_path)
            .arg(self.extension_id.as_deref().unwrap_or_default())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BridgeError::manifest("host stdio unavailable"));
        };
        info!("🚀 Native host started (pid {:?})", child.id());
        Ok(HostConnection::new(stdout, stdin).with_child(child))
    }
}

#[async_trait]
impl HostConnector for NativeHostConnector {
    fn host_name(&self) -> &str {
        &self.host_name
    }

    async fn connect(&self) -> Result<HostConnection, BridgeError> {
        self.spawn()
            .await
            .map_err(|err| BridgeError::connect_failure(&self.host_name, err))
    }
}
