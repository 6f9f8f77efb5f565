//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PeerlinkError, Result};
use crate::protocol::{DEFAULT_CHANNEL_LABEL, DEFAULT_STUN_SERVER};

/// URL schemes accepted for discovery servers
const SERVER_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Candidate discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Data channel configuration
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| PeerlinkError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file at the default location, if there is one
    pub fn from_default_file() -> Result<Option<Self>> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path).map(Some),
            _ => Ok(None),
        }
    }

    /// Default config file location (`<config dir>/peerlink/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("peerlink").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(servers) = std::env::var("PEERLINK_STUN_SERVERS") {
            let servers = parse_server_list(&servers);
            if !servers.is_empty() {
                config.discovery.stun_servers = servers;
            }
        }
        if let Ok(label) = std::env::var("PEERLINK_CHANNEL_LABEL") {
            if !label.is_empty() {
                config.channel.label = label;
            }
        }

        config
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let defaults = Self::default();
        Self {
            discovery: DiscoveryConfig {
                stun_servers: if other.discovery.stun_servers != defaults.discovery.stun_servers {
                    other.discovery.stun_servers
                } else {
                    self.discovery.stun_servers
                },
            },
            channel: ChannelConfig {
                label: if other.channel.label != defaults.channel.label {
                    other.channel.label
                } else {
                    self.channel.label
                },
            },
        }
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.discovery.stun_servers.is_empty() {
            return Err(PeerlinkError::Config(
                "At least one discovery server is required".to_string(),
            ));
        }
        for server in &self.discovery.stun_servers {
            if !SERVER_SCHEMES.iter().any(|scheme| server.starts_with(scheme)) {
                return Err(PeerlinkError::Config(format!(
                    "Invalid discovery server URL: {server}"
                )));
            }
        }
        if self.channel.label.is_empty() {
            return Err(PeerlinkError::Config("Channel label must not be empty".to_string()));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PeerlinkError::Config(format!("Failed to render config: {e}")))
    }

    /// Write as TOML to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

/// Candidate discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Public reflection servers queried for server reflexive candidates
    pub stun_servers: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

/// Data channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Label of the locally opened channel
    pub label: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_CHANNEL_LABEL.to_string(),
        }
    }
}

/// Split a comma-separated server list, dropping blanks
pub fn parse_server_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(
            config.discovery.stun_servers,
            vec!["stun:stun.l.google.com:19302".to_string()]
        );
        assert_eq!(config.channel.label, "peerlink");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [discovery]
            stun_servers = ["stun:stun1.example.org:3478", "stun:stun2.example.org:3478"]

            [channel]
            label = "chat"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.discovery.stun_servers.len(), 2);
        assert_eq!(config.channel.label, "chat");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[channel]\nlabel = \"chat\"\n").unwrap();
        assert_eq!(config.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.channel.label = "files".to_string();
        config.save(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_from_file_rejects_bad_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[discovery]\nstun_servers = [\"http://example.org\"]\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, PeerlinkError::Config(_)));
    }

    #[test]
    fn test_from_file_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[discovery\nstun_servers = 3\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, PeerlinkError::Config(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/peerlink.toml").unwrap_err();
        assert!(matches!(err, PeerlinkError::Config(_)));
    }

    #[test]
    fn test_validate_empty_servers() {
        let mut config = Config::default();
        config.discovery.stun_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_prefers_non_default() {
        let mut file = Config::default();
        file.discovery.stun_servers = vec!["stun:file.example.org:3478".to_string()];
        file.channel.label = "file".to_string();

        let mut cli = Config::default();
        cli.channel.label = "cli".to_string();

        let merged = file.merge(cli);
        assert_eq!(merged.discovery.stun_servers, vec!["stun:file.example.org:3478"]);
        assert_eq!(merged.channel.label, "cli");
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("PEERLINK_STUN_SERVERS", "stun:a.example.org:3478, stun:b.example.org:3478");
        std::env::set_var("PEERLINK_CHANNEL_LABEL", "env");
        let config = Config::from_env();
        std::env::remove_var("PEERLINK_STUN_SERVERS");
        std::env::remove_var("PEERLINK_CHANNEL_LABEL");

        assert_eq!(config.discovery.stun_servers.len(), 2);
        assert_eq!(config.channel.label, "env");
    }

    #[test]
    fn test_parse_server_list() {
        assert_eq!(
            parse_server_list(" stun:a:1 ,, stun:b:2 "),
            vec!["stun:a:1".to_string(), "stun:b:2".to_string()]
        );
    }
}
