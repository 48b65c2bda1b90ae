//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! weather-config.toml file. It provides a centralized way to configure the
//! weather endpoint, station bring-up policy, clock synchronization and display
//! output.
//!
//! Secrets do not live here: network and API credentials are read from the
//! credential store named by `credentials_path` (see [`crate::credentials`]).

use crate::time_sync::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::wifi::DEFAULT_MAX_RETRIES;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "weather-config.toml";

/// Application configuration loaded from weather-config.toml
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Path of the TOML credential store
    pub credentials_path: String,
    /// Weather service configuration
    pub weather: WeatherConfig,
    /// Station (Wi-Fi) bring-up configuration
    pub station: StationConfig,
    /// Wall-clock synchronization configuration
    pub time: TimeConfig,
    /// Display output configuration
    pub display: DisplayConfig,
}

/// Weather service endpoint configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Scheme and host of the service, without a trailing slash
    pub endpoint: String,
    /// Overall request timeout in milliseconds
    pub timeout_ms: u64,
}

/// Station bring-up configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StationConfig {
    /// Wireless interface name (e.g. "wlan0")
    pub interface: String,
    /// Consecutive disconnects tolerated before giving up
    pub max_retries: u32,
    /// Upper bound on the whole bring-up wait; `None` waits forever
    pub connect_deadline_secs: Option<u64>,
    /// Drive association through nmcli (true) or only observe an existing link
    pub manage_association: bool,
    /// Remote address used to discover the routable local address
    pub probe_address: String,
    /// Program and leading arguments used to invoke nmcli (e.g. ["sudo", "nmcli"])
    pub nmcli_command: Vec<String>,
}

/// Clock synchronization configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeConfig {
    /// NTP server handed to the time client
    pub server: String,
    /// Number of clock samples before giving up
    pub max_attempts: u32,
    /// Sleep before each clock sample, in milliseconds
    pub poll_interval_ms: u64,
}

/// Display output configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Framebuffer width in pixels
    pub width: u32,
    /// Framebuffer height in pixels
    pub height: u32,
    /// Where the rendered PBM image is written
    pub output_path: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            endpoint: "http://api.openweathermap.org".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            interface: "wlan0".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            connect_deadline_secs: Some(120),
            manage_association: true,
            probe_address: "8.8.8.8:80".to_string(),
            nmcli_command: vec!["nmcli".to_string()],
        }
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        TimeConfig {
            server: "pool.ntp.org".to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            width: 400,  // Waveshare 4.2" panel
            height: 300, // Waveshare 4.2" panel
            output_path: "/tmp/weather.pbm".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            credentials_path: "weather-credentials.toml".to_string(),
            weather: WeatherConfig::default(),
            station: StationConfig::default(),
            time: TimeConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl WeatherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StationConfig {
    pub fn connect_deadline(&self) -> Option<Duration> {
        self.connect_deadline_secs.map(Duration::from_secs)
    }
}

impl TimeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from weather-config.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(target: "Config", "Loaded configuration for endpoint: {}", config.weather.endpoint);
                    config
                }
                Err(e) => {
                    warn!(target: "Config", "Invalid config file format: {}", e);
                    warn!(target: "Config", "Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                info!(target: "Config", "No config file found, using default configuration");
                Self::default()
            }
        }
    }

    /// Save current configuration to the given path as pretty TOML
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        info!(target: "Config", "Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Save current configuration to weather-config.toml
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to_path(CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.weather.endpoint, "http://api.openweathermap.org");
        assert_eq!(config.weather.timeout_ms, 5000);
        assert_eq!(config.station.max_retries, 5);
        assert_eq!(config.time.server, "pool.ntp.org");
        assert_eq!(config.time.max_attempts, 10);
        assert_eq!(config.time.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.station.nmcli_command, vec!["nmcli".to_string()]);
    }

    #[test]
    fn test_defaults_follow_module_constants() {
        let config = Config::default();
        assert_eq!(config.station.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.time.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.time.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(
            crate::wifi::ConnectionState::new(config.station.max_retries),
            crate::wifi::ConnectionState::default()
        );
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [station]
            interface = "wlp2s0"
            connect_deadline_secs = 15
            "#,
        )
        .unwrap();
        assert_eq!(parsed.station.interface, "wlp2s0");
        assert_eq!(parsed.station.connect_deadline(), Some(Duration::from_secs(15)));
        assert_eq!(parsed.station.max_retries, 5);
        assert_eq!(parsed.weather, WeatherConfig::default());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file_falls_back() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "this is [not toml").unwrap();
        assert_eq!(Config::load_from_path(file.path()), Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.display.output_path = "/tmp/other.pbm".to_string();
        config.save_to_path(file.path()).unwrap();
        assert_eq!(Config::load_from_path(file.path()), config);
    }
}
