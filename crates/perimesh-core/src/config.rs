//! Configuration system for perimesh.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PERIMESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/perimesh/config.toml
//!   3. ~/.config/perimesh/config.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::{NodeId, NodeIdentity};
use crate::wire;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerimeshConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub sharing: SharingConfig,
    pub client: ClientConfig,
    /// Local peripherals the daemon attaches at startup.
    pub peripherals: Vec<PeripheralConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Stable node id. Unset = pick a random one at startup.
    pub node_id: Option<u32>,
    /// Human-readable label sent with every LIST/ANNOUNCE.
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network interface name. Empty = auto-detect.
    pub interface: String,
    /// UDP port for link traffic.
    pub port: u16,
    /// Loopback port for the control API.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    /// Peripheral types never exposed to other nodes.
    pub excluded_types: Vec<String>,
    /// Unsolicited re-announce interval. 0 = only announce on change.
    pub announce_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub call_timeout_ms: u64,
    pub discover_wait_ms: u64,
    pub disconnect_threshold: u32,
    pub cooldown_secs: u64,
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Backing directory, for peripheral types that need one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            label: hostname(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: wire::LINK_PORT,
            api_port: wire::API_PORT,
        }
    }
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            excluded_types: DEFAULT_EXCLUDED_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            announce_interval_secs: wire::ANNOUNCE_INTERVAL_SECS,
        }
    }
}

/// Infrastructure-only peripheral types: network transports, display
/// surfaces, compute nodes, and mobile units.
pub const DEFAULT_EXCLUDED_TYPES: &[&str] = &["modem", "monitor", "computer", "turtle"];

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: wire::CALL_TIMEOUT_MS,
            discover_wait_ms: wire::DISCOVER_WAIT_MS,
            disconnect_threshold: wire::DISCONNECT_THRESHOLD,
            cooldown_secs: wire::RECONNECT_COOLDOWN_SECS,
            sweep_interval_ms: wire::SWEEP_INTERVAL_MS,
        }
    }
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn discover_wait(&self) -> Duration {
        Duration::from_millis(self.discover_wait_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl IdentityConfig {
    /// The configured identity, or a random one if no id is set.
    pub fn resolve(&self) -> NodeIdentity {
        let id = self
            .node_id
            .unwrap_or_else(|| rand::random::<u32>() % 1_000_000);
        NodeIdentity::new(NodeId(id), self.label.clone())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("perimesh")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "perimesh-node".to_string())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PerimeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            PerimeshConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PERIMESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PerimeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PERIMESH_* overrides. `lookup` is the environment.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PERIMESH_IDENTITY__NODE_ID") {
            if let Ok(id) = v.parse() {
                self.identity.node_id = Some(id);
            }
        }
        if let Some(v) = lookup("PERIMESH_IDENTITY__LABEL") {
            self.identity.label = v;
        }
        if let Some(v) = lookup("PERIMESH_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Some(v) = lookup("PERIMESH_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = lookup("PERIMESH_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Some(v) = lookup("PERIMESH_SHARING__ANNOUNCE_INTERVAL_SECS") {
            if let Ok(s) = v.parse() {
                self.sharing.announce_interval_secs = s;
            }
        }
        if let Some(v) = lookup("PERIMESH_CLIENT__CALL_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.client.call_timeout_ms = ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_excludes_infrastructure_types() {
        let config = PerimeshConfig::default();
        for kind in ["modem", "monitor", "computer", "turtle"] {
            assert!(config.sharing.excluded_types.iter().any(|t| t == kind));
        }
        assert_eq!(config.client.disconnect_threshold, 3);
        assert_eq!(config.client.cooldown(), Duration::from_secs(10));
        assert!(config.peripherals.is_empty());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("PERIMESH_IDENTITY__NODE_ID", "42"),
            ("PERIMESH_IDENTITY__LABEL", "base"),
            ("PERIMESH_NETWORK__PORT", "9200"),
            ("PERIMESH_CLIENT__CALL_TIMEOUT_MS", "oops"),
        ]
        .into_iter()
        .collect();

        let mut config = PerimeshConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.identity.node_id, Some(42));
        assert_eq!(config.identity.label, "base");
        assert_eq!(config.network.port, 9200);
        // Unparseable values leave the default in place.
        assert_eq!(config.client.call_timeout_ms, wire::CALL_TIMEOUT_MS);
    }

    #[test]
    fn resolve_uses_configured_id() {
        let identity = IdentityConfig {
            node_id: Some(7),
            label: "shed".to_string(),
        }
        .resolve();
        assert_eq!(identity, NodeIdentity::new(NodeId(7), "shed"));
    }

    #[test]
    fn peripherals_parse_from_toml() {
        let text = r#"
            [identity]
            node_id = 12

            [[peripherals]]
            name = "left"
            type = "cell"

            [[peripherals]]
            name = "disk"
            type = "drive"
            path = "/srv/disk"
        "#;
        let config: PerimeshConfig = toml::from_str(text).unwrap();
        assert_eq!(config.identity.node_id, Some(12));
        assert_eq!(config.peripherals.len(), 2);
        assert_eq!(config.peripherals[1].kind, "drive");
        assert_eq!(config.peripherals[1].path, Some(PathBuf::from("/srv/disk")));
        // Sections that were not mentioned fall back to defaults.
        assert_eq!(config.network.port, wire::LINK_PORT);
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("perimesh-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("PERIMESH_CONFIG", config_path.to_str().unwrap());
        }

        let path = PerimeshConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = PerimeshConfig::from_file(&path).expect("load should succeed");
        assert_eq!(config.client.disconnect_threshold, wire::DISCONNECT_THRESHOLD);

        unsafe {
            std::env::remove_var("PERIMESH_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
