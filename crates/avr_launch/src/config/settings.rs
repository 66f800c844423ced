//! Launcher settings YAML schema

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::{Registry, RegistryError};

/// Root launcher configuration
///
/// Every key is optional. Missing keys fall back to the values the
/// vehicle images are built against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    /// Docker compose project name (must be lower case)
    pub project_name: String,

    /// Registry prefix for pre-built images
    pub image_base: String,

    /// Directory holding per-module build contexts
    pub modules_dir: PathBuf,

    /// Where the generated compose file is written
    pub compose_file: PathBuf,

    /// Seconds a service gets to stop before it is killed
    pub stop_timeout_secs: u64,

    /// Seconds between container liveness checks while running
    pub health_interval_secs: u64,

    pub mqtt: MqttSettings,
    pub fcc: SerialSettings,
    pub pcc: SerialSettings,
    pub mavlink: MavlinkSettings,
    pub px4_home: Px4Home,

    /// Extra groups: name -> module names
    pub groups: IndexMap<String, Vec<String>>,
}

/// MQTT broker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
}

/// Serial device attached to the companion computer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialSettings {
    pub device: PathBuf,
    pub baud_rate: u32,
}

/// MAVLink endpoints exposed by mavp2p
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MavlinkSettings {
    /// TCP server port for ground control
    pub tcp_port: u16,
    /// UDP port for mavsdk
    pub udp_port_1: u16,
    /// UDP port for pymavlink
    pub udp_port_2: u16,
    /// Offboard UDP port opened when the simulator runs
    pub simulator_port: u16,
}

/// PX4 home position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Px4Home {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            project_name: "avr".to_string(),
            image_base: "ghcr.io/bellflight/avr/".to_string(),
            modules_dir: PathBuf::from("modules"),
            compose_file: PathBuf::from("docker-compose.yml"),
            stop_timeout_secs: 10,
            health_interval_secs: 2,
            mqtt: MqttSettings::default(),
            fcc: SerialSettings {
                device: PathBuf::from("/dev/ttyTHS1"),
                baud_rate: 500_000,
            },
            pcc: SerialSettings {
                device: PathBuf::from("/dev/ttyACM0"),
                baud_rate: 115_200,
            },
            mavlink: MavlinkSettings::default(),
            px4_home: Px4Home::default(),
            groups: IndexMap::new(),
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "mqtt".to_string(),
            port: 18830,
        }
    }
}

impl Default for MavlinkSettings {
    fn default() -> Self {
        Self {
            tcp_port: 5760,
            udp_port_1: 14541,
            udp_port_2: 14542,
            simulator_port: 14540,
        }
    }
}

impl Default for Px4Home {
    fn default() -> Self {
        Self {
            lat: 32.808549,
            lon: -97.156345,
            alt: 161.5,
        }
    }
}

impl LauncherConfig {
    /// Default config location: `<config_dir>/avr/launch.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("avr").join("launch.yaml"))
    }

    /// Load config from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Load from an explicit path, or from the default location if a file
    /// exists there, or fall back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Using config file {}", path.display());
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Parse config from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as a map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: LauncherConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_name.is_empty() {
            return Err(ConfigError::Validation(
                "'project_name' must not be empty".to_string(),
            ));
        }
        // docker compose only accepts lower case project names
        if self.project_name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Validation(format!(
                "'project_name' must be lower case, got '{}'",
                self.project_name
            )));
        }
        if self.stop_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "'stop_timeout_secs' must be at least 1".to_string(),
            ));
        }
        if self.health_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "'health_interval_secs' must be at least 1".to_string(),
            ));
        }
        // Surface bad group definitions at load time
        self.registry()?;
        Ok(())
    }

    /// Built-in registry extended with the configured groups
    pub fn registry(&self) -> Result<Registry, ConfigError> {
        let mut registry = Registry::builtin();
        for (name, members) in &self.groups {
            registry.add_group(name, members.iter().cloned())?;
        }
        Ok(registry)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Full image reference for a module image name
    pub fn image(&self, name: &str) -> String {
        format!("{}{}:latest", self.image_base, name)
    }
}

/// Errors that can occur when loading the launcher config
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid group: {0}")]
    Group(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_vehicle_images() {
        let config = LauncherConfig::default();
        assert_eq!(config.project_name, "avr");
        assert_eq!(config.mqtt.port, 18830);
        assert_eq!(config.fcc.device, PathBuf::from("/dev/ttyTHS1"));
        assert_eq!(config.fcc.baud_rate, 500_000);
        assert_eq!(config.mavlink.tcp_port, 5760);
        assert_eq!(
            config.image("flightcontrol"),
            "ghcr.io/bellflight/avr/flightcontrol:latest"
        );
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let yaml = r#"
project_name: drone
mqtt:
  host: localhost
  port: 1883
"#;
        let config = LauncherConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.project_name, "drone");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.pcc.baud_rate, 115_200);
        assert_eq!(config.stop_timeout_secs, 10);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = LauncherConfig::from_yaml("  \n").unwrap();
        assert_eq!(config.project_name, "avr");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = LauncherConfig::from_yaml("projekt_name: avr\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_upper_case_project_rejected() {
        let result = LauncherConfig::from_yaml("project_name: AVR\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_groups_extend_registry() {
        let yaml = r#"
groups:
  sensors:
    - thermal
    - vio
"#;
        let config = LauncherConfig::from_yaml(yaml).unwrap();
        let registry = config.registry().unwrap();
        let selection = registry.resolve(&["sensors"]).unwrap();
        assert_eq!(selection.len(), 2);
    }

    #[test]
    fn test_bad_group_rejected_at_load() {
        let yaml = r#"
groups:
  sensors:
    - lidar
"#;
        let result = LauncherConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::Group(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.yaml");
        std::fs::write(&path, "stop_timeout_secs: 3\n").unwrap();

        let config = LauncherConfig::load(Some(&path)).unwrap();
        assert_eq!(config.stop_timeout(), Duration::from_secs(3));

        let missing = LauncherConfig::from_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
