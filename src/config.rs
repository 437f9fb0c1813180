use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/mesh_chat.json";
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Interface the listener binds to.
    pub listen_host: String,
    /// Skips the interactive name prompt when set.
    pub display_name: Option<String>,
    /// Lines a peer's writer may have queued before senders wait.
    pub outbound_capacity: usize,
    pub dial_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            display_name: None,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    pub fn node_settings(&self, listen_port: u16, display_name: String) -> NodeSettings {
        NodeSettings {
            listen_host: self.listen_host.clone(),
            listen_port,
            display_name,
            outbound_capacity: self.outbound_capacity.max(1),
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
        }
    }
}

/// Resolved runtime settings for one mesh node.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub listen_host: String,
    /// `0` picks an ephemeral port.
    pub listen_port: u16,
    pub display_name: String,
    pub outbound_capacity: usize,
    pub dial_timeout: Duration,
}

impl NodeSettings {
    pub fn new(display_name: impl Into<String>) -> Self {
        AppConfig::default().node_settings(0, display_name.into())
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

/// Accepts `9001` as well as the `:9001` form.
pub fn parse_port(value: &str) -> Result<u16, String> {
    let digits = value.trim().trim_start_matches(':');
    digits
        .parse::<u16>()
        .map_err(|err| format!("invalid port `{value}`: {err}"))
}

/// Expands a bare `:port` to a loopback address; anything else is returned as is.
pub fn normalize_peer_address(value: &str) -> String {
    let value = value.trim();
    if value.starts_with(':') {
        format!("{DEFAULT_LISTEN_HOST}{value}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config("definitely/not/here.json");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_absent_fields() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"display_name": "alice", "outbound_capacity": 8}}"#).unwrap();

        let config = load_config(file.path().to_str().unwrap());
        assert_eq!(config.display_name.as_deref(), Some("alice"));
        assert_eq!(config.outbound_capacity, 8);
        assert_eq!(config.listen_host, DEFAULT_LISTEN_HOST);
        assert_eq!(config.dial_timeout_secs, DEFAULT_DIAL_TIMEOUT_SECS);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json at all").unwrap();

        let config = load_config(file.path().to_str().unwrap());
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn node_settings_never_use_a_zero_capacity_queue() {
        let config = AppConfig {
            outbound_capacity: 0,
            ..AppConfig::default()
        };
        let settings = config.node_settings(9001, "bob".into());
        assert_eq!(settings.outbound_capacity, 1);
        assert_eq!(settings.listen_port, 9001);
        assert_eq!(settings.dial_timeout, Duration::from_secs(5));
    }

    #[rstest]
    #[case("9001", 9001)]
    #[case(":9001", 9001)]
    #[case(" 80 ", 80)]
    fn parses_both_port_forms(#[case] value: &str, #[case] expected: u16) {
        assert_eq!(parse_port(value), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("localhost:9001")]
    #[case("70000")]
    fn rejects_bad_ports(#[case] value: &str) {
        assert!(parse_port(value).is_err());
    }

    #[rstest]
    #[case(":9001", "127.0.0.1:9001")]
    #[case("10.1.2.3:9001", "10.1.2.3:9001")]
    #[case("example.org:9001", "example.org:9001")]
    fn normalizes_peer_addresses(#[case] value: &str, #[case] expected: &str) {
        assert_eq!(normalize_peer_address(value), expected);
    }
}
