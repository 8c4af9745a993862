//! Extension pour lire les réglages du pont dans tmbconfig
//!
//! Ce module fournit le trait `BridgeConfigExt` qui transforme la
//! configuration YAML en un [`BridgeSettings`] prêt à l'emploi.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tmbconfig::Config;

use crate::probe::ProbeTimings;
use crate::transport::{DEFAULT_RECONNECT_DELAY, NATIVE_HOST_NAME};

/// Runtime settings of a bridge.
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeSettings {
    /// Native messaging host name.
    pub host_name: String,
    /// Extension id passed to the host and checked against its manifest.
    pub extension_id: Option<String>,
    /// Searched before the standard manifest locations.
    pub manifest_dirs: Vec<PathBuf>,
    pub reconnect_delay: Duration,
    pub probe: ProbeTimings,
    pub log_min_level: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host_name: NATIVE_HOST_NAME.to_string(),
            extension_id: None,
            manifest_dirs: Vec::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            probe: ProbeTimings::default(),
            log_min_level: "INFO".to_string(),
        }
    }
}

/// Trait d'extension pour lire les réglages du pont dans tmbconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use tmbconfig::get_config;
/// use tmbcontrol::BridgeConfigExt;
///
/// let settings = get_config().bridge_settings()?;
/// let bridge = TabMediaBridge::spawn(settings.clone(), NativeHostConnector::from_settings(&settings));
/// ```
pub trait BridgeConfigExt {
    /// Construit les réglages à partir de la configuration
    ///
    /// Les durées nulles sont ramenées à 1 ms.
    fn bridge_settings(&self) -> Result<BridgeSettings>;
}

impl BridgeConfigExt for Config {
    fn bridge_settings(&self) -> Result<BridgeSettings> {
        Ok(BridgeSettings {
            host_name: self.get_host_name(),
            extension_id: self.get_extension_id(),
            manifest_dirs: self.get_manifest_dirs(),
            reconnect_delay: millis(self.get_reconnect_delay_ms()?),
            probe: ProbeTimings {
                scan_interval: millis(self.get_scan_interval_ms()?),
                heartbeat_interval: millis(self.get_heartbeat_interval_ms()?),
                initial_snapshot_delay: millis(self.get_initial_snapshot_delay_ms()?),
            },
            log_min_level: self.get_log_min_level()?,
        })
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_matches_defaults() {
        let settings = Config::embedded().bridge_settings().unwrap();
        let defaults = BridgeSettings::default();

        assert_eq!(settings.host_name, defaults.host_name);
        assert_eq!(settings.reconnect_delay, defaults.reconnect_delay);
        assert_eq!(settings.probe, defaults.probe);
        assert_eq!(settings.extension_id.as_deref(), Some("per-tab-mpris@bridge"));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = Config::embedded();
        config.set_scan_interval_ms(0).unwrap();
        config.set_reconnect_delay_ms(250).unwrap();

        let settings = config.bridge_settings().unwrap();
        assert_eq!(settings.probe.scan_interval, Duration::from_millis(1));
        assert_eq!(settings.reconnect_delay, Duration::from_millis(250));
    }
}
