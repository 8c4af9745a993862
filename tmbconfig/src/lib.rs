//! # Tab Media Bridge Configuration Module
//!
//! This module provides configuration management for the tab media bridge:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Type-safe getters and setters for configuration values
//! - Thread-safe shared access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use tmbconfig::get_config;
//!
//! let config = get_config();
//!
//! let host = config.get_host_name();
//! let delay = config.get_reconnect_delay_ms()?;
//!
//! config.set_reconnect_delay_ms(2500)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde_yaml::{Mapping, Number, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("tabmediabridge.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(Config::load_or_embedded(""));
}

const CONFIG_DIR_NAME: &str = ".tabmediabridge";
const CONFIG_FILE_NAME: &str = "config.yaml";

// Default values for configuration
pub const DEFAULT_HOST_NAME: &str = "per_tab_mpris_bridge";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_INITIAL_SNAPSHOT_DELAY_MS: u64 = 2000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Macro to generate getter/setter for millisecond values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().unwrap_or($default)),
                Ok(Value::String(s)) => Ok(s.trim().parse::<u64>().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Configuration manager for the bridge
///
/// The whole tree lives in memory behind a mutex. `path` is empty for the
/// embedded fallback configuration, in which case nothing is written to disk.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data.lock().clone()),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 3. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. `.tabmediabridge` in the current directory
    /// 3. `.tabmediabridge` in the user's home directory
    ///
    /// The directory is created if it doesn't exist.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        let path = Path::new(&config_dir)
            .join(CONFIG_FILE_NAME)
            .to_string_lossy()
            .to_string();

        let mut default_value = Self::lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file=%path, "Loaded config file");
                let external_value = Self::lower_keys_value(serde_yaml::from_slice(&data)?);
                merge_yaml(&mut default_value, &external_value);
            }
            Err(_) => {
                info!(config_file=%path, "Config file not found, using default embedded config");
            }
        }

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(default_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds a configuration holding only the embedded defaults.
    ///
    /// Nothing is ever written to disk by this configuration.
    pub fn embedded() -> Self {
        let data = serde_yaml::from_str(DEFAULT_CONFIG)
            .map(Self::lower_keys_value)
            .unwrap_or_else(|_| Value::Mapping(Mapping::new()));
        Config {
            config_dir: String::new(),
            path: String::new(),
            data: Mutex::new(data),
        }
    }

    fn load_or_embedded(directory: &str) -> Self {
        match Self::load_config(directory) {
            Ok(config) => config,
            Err(err) => {
                warn!("⚠️ Failed to load configuration ({}), using embedded defaults", err);
                Self::embedded()
            }
        }
    }

    /// Directory holding `config.yaml`, empty for the embedded configuration
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        let yaml = serde_yaml::to_string(&*self.data.lock())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["bridge", "host", "name"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock();
        let mut current = &*data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Gets the native messaging host name
    ///
    /// Falls back to `per_tab_mpris_bridge` when missing or empty.
    pub fn get_host_name(&self) -> String {
        match self.get_value(&["bridge", "host", "name"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Ok(_) => {
                warn!("Host name is not a string or empty, using default {}", DEFAULT_HOST_NAME);
                DEFAULT_HOST_NAME.to_string()
            }
            Err(_) => DEFAULT_HOST_NAME.to_string(),
        }
    }

    pub fn set_host_name(&self, name: &str) -> Result<()> {
        self.set_value(&["bridge", "host", "name"], Value::String(name.to_string()))
    }

    /// Gets the extension id handed to the host program, if any
    pub fn get_extension_id(&self) -> Option<String> {
        match self.get_value(&["bridge", "host", "extension_id"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    pub fn set_extension_id(&self, id: &str) -> Result<()> {
        self.set_value(&["bridge", "host", "extension_id"], Value::String(id.to_string()))
    }

    /// Gets extra directories searched for the host manifest
    ///
    /// Relative entries are resolved against the configuration directory.
    pub fn get_manifest_dirs(&self) -> Vec<PathBuf> {
        let entries = match self.get_value(&["bridge", "host", "manifest_dirs"]) {
            Ok(Value::Sequence(seq)) => seq,
            Ok(Value::String(s)) if !s.is_empty() => vec![Value::String(s)],
            _ => return Vec::new(),
        };

        entries
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(self.resolve_dir(&s)),
                _ => None,
            })
            .collect()
    }

    pub fn set_manifest_dirs(&self, dirs: &[String]) -> Result<()> {
        let seq = dirs.iter().cloned().map(Value::String).collect();
        self.set_value(&["bridge", "host", "manifest_dirs"], Value::Sequence(seq))
    }

    fn resolve_dir(&self, dir: &str) -> PathBuf {
        let path = Path::new(dir);
        if path.is_absolute() || self.config_dir.is_empty() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        }
    }

    impl_u64_config!(
        get_reconnect_delay_ms,
        set_reconnect_delay_ms,
        &["bridge", "transport", "reconnect_delay_ms"],
        DEFAULT_RECONNECT_DELAY_MS
    );

    impl_u64_config!(
        get_scan_interval_ms,
        set_scan_interval_ms,
        &["bridge", "probe", "scan_interval_ms"],
        DEFAULT_SCAN_INTERVAL_MS
    );

    impl_u64_config!(
        get_heartbeat_interval_ms,
        set_heartbeat_interval_ms,
        &["bridge", "probe", "heartbeat_interval_ms"],
        DEFAULT_HEARTBEAT_INTERVAL_MS
    );

    impl_u64_config!(
        get_initial_snapshot_delay_ms,
        set_initial_snapshot_delay_ms,
        &["bridge", "probe", "initial_snapshot_delay_ms"],
        DEFAULT_INITIAL_SNAPSHOT_DELAY_MS
    );

    /// Gets the minimum log level requested for subscribers
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["bridge", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["bridge", "logger", "min_level"], Value::String(level))
    }
}

/// Returns the process-wide configuration instance
///
/// Lazily loaded on first access. If the configuration directory cannot be
/// prepared, the embedded defaults are used instead.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default ones.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::embedded();
        assert_eq!(config.get_host_name(), "per_tab_mpris_bridge");
        assert_eq!(config.get_reconnect_delay_ms().unwrap(), 5000);
        assert_eq!(config.get_scan_interval_ms().unwrap(), 3000);
        assert_eq!(config.get_heartbeat_interval_ms().unwrap(), 5000);
        assert_eq!(config.get_initial_snapshot_delay_ms().unwrap(), 2000);
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert!(config.get_manifest_dirs().is_empty());
        assert_eq!(config.directory(), "");
    }

    #[test]
    fn test_user_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "Bridge:\n  Transport:\n    reconnect_delay_ms: 750\n  host:\n    manifest_dirs: [hosts, /opt/hosts]\n",
        )
        .unwrap();

        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config.directory(), dir.path().to_str().unwrap());
        assert_eq!(config.get_reconnect_delay_ms().unwrap(), 750);
        // untouched keys keep their defaults
        assert_eq!(config.get_scan_interval_ms().unwrap(), 3000);
        assert_eq!(config.get_host_name(), "per_tab_mpris_bridge");
        assert_eq!(
            config.get_manifest_dirs(),
            vec![dir.path().join("hosts"), PathBuf::from("/opt/hosts")]
        );
    }

    #[test]
    fn test_setters_persist_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        config.set_heartbeat_interval_ms(1234).unwrap();
        config.set_host_name("other_host").unwrap();

        let reloaded = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(reloaded.get_heartbeat_interval_ms().unwrap(), 1234);
        assert_eq!(reloaded.get_host_name(), "other_host");
    }

    #[test]
    fn test_ill_typed_values_fall_back_to_defaults() {
        let config = Config::embedded();
        config
            .set_value(&["bridge", "probe", "scan_interval_ms"], Value::Bool(true))
            .unwrap();
        config
            .set_value(&["bridge", "host", "name"], Value::String("  ".into()))
            .unwrap();
        assert_eq!(config.get_scan_interval_ms().unwrap(), DEFAULT_SCAN_INTERVAL_MS);
        assert_eq!(config.get_host_name(), DEFAULT_HOST_NAME);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let config = Config::embedded();
        assert!(config.get_value(&["bridge", "nope", "value"]).is_err());
    }
}
