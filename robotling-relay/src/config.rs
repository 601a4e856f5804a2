use crate::row::ColumnMapping;
use crate::store::validate_table_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "ROBOTLING_RELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "relay.yaml";
/// rumqttc's own default is 10 KiB, too small for a full status snapshot
pub const DEFAULT_MAX_PACKET_BYTES: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub mqtt: MqttConf,
    /// Robot GUID, e.g. `robotling_30aea42664a8`
    pub root_topic: String,
    pub database: DatabaseConf,
    pub poll_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub mapping: ColumnMapping,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub client_id: Option<String>,
    pub connect_timeout_ms: u64,
    /// Largest packet accepted from or sent to the broker
    pub max_packet_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConf {
    pub path: PathBuf,
    pub table: String,
    /// Create the status table when it does not exist yet
    pub create_table: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            root_topic: String::new(),
            database: DatabaseConf::default(),
            poll_interval_ms: 50,
            reconnect_backoff_ms: 500,
            mapping: ColumnMapping::Positional,
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            keep_alive_secs: 60,
            client_id: None,
            connect_timeout_ms: 5000,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
        }
    }
}

impl Default for DatabaseConf {
    fn default() -> Self {
        Self {
            path: PathBuf::from("robotling.db"),
            table: "rob".into(),
            create_table: false,
        }
    }
}

impl RelayConfig {
    /// Load from `$ROBOTLING_RELAY_CONFIG` (default `relay.yaml`).
    /// A missing file means defaults, an unreadable or malformed one is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let path = Path::new(&path);
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&txt).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(txt: &str) -> Result<Self, serde_yaml::Error> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let root = self.root_topic.trim();
        if root.is_empty() {
            return Err(ConfigError::Invalid(
                "no robotling GUID given (root_topic or --guid)".into(),
            ));
        }
        if root.contains(['#', '+']) || root.starts_with('/') || root.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "root topic `{root}` must be a plain topic prefix"
            )));
        }
        validate_table_name(&self.database.table)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.poll_interval_ms == 0 || self.reconnect_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms and reconnect_backoff_ms must be > 0".into(),
            ));
        }
        if self.mqtt.keep_alive_secs == 0 || self.mqtt.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive_secs and mqtt.connect_timeout_ms must be > 0".into(),
            ));
        }
        if self.mqtt.max_packet_bytes < 1024 {
            return Err(ConfigError::Invalid(
                "mqtt.max_packet_bytes must be at least 1024".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

impl MqttConf {
    /// Configured client id, or a random one so two relays never kick each other off
    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => format!("robotling-relay-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.keep_alive_secs, 60);
        assert_eq!(cfg.mqtt.max_packet_bytes, 256 * 1024);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(50));
        assert_eq!(cfg.reconnect_backoff(), Duration::from_millis(500));
        assert_eq!(cfg.database.table, "rob");
        assert_eq!(cfg.mapping, ColumnMapping::Positional);
        // no GUID yet
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = RelayConfig::from_yaml(
            "root_topic: robotling_30aea42664a8\nmapping: by-topic\nmqtt:\n  host: 192.168.0.6\n  max_packet_bytes: 1048576\ndatabase:\n  path: /tmp/dash.db\n",
        )
        .unwrap();
        assert_eq!(cfg.mqtt.host, "192.168.0.6");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.max_packet_bytes, 1_048_576);
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/dash.db"));
        assert_eq!(cfg.database.table, "rob");
        assert_eq!(cfg.mapping, ColumnMapping::ByTopic);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg = RelayConfig::from_yaml("  \n").unwrap();
        assert_eq!(cfg.mqtt.host, "localhost");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = RelayConfig {
            root_topic: "robotling/#".into(),
            ..RelayConfig::default()
        };
        assert!(cfg.validate().is_err());
        cfg.root_topic = "robotling_1".into();
        cfg.database.table = "rob; drop".into();
        assert!(cfg.validate().is_err());
        cfg.database.table = "rob".into();
        cfg.poll_interval_ms = 0;
        assert!(cfg.validate().is_err());
        cfg.poll_interval_ms = 50;
        cfg.mqtt.max_packet_bytes = 16;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_client_id() {
        let mut mqtt = MqttConf::default();
        let generated = mqtt.client_id();
        assert!(generated.starts_with("robotling-relay-"));
        assert_ne!(generated, mqtt.client_id());
        mqtt.client_id = Some("dashboard-relay".into());
        assert_eq!(mqtt.client_id(), "dashboard-relay");
    }
}
