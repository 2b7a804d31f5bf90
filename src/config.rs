//! Configuration management for mudproxy
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from a YAML file, environment variables, and CLI
//! overrides. `PORT` and `ADMIN_KEY` are the two environment variables the
//! core contract names; everything else here is ambient tuning the core
//! doesn't otherwise require.

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for mudproxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Admin key required for `/sessions` and `/broadcast`. Absent means
    /// those endpoints always answer 500 ("server not configured").
    #[serde(default)]
    pub admin_key: Option<String>,

    /// Whitelisted MUD targets a session's `set_server` may connect to.
    #[serde(default = "default_whitelist")]
    pub mud_whitelist: Vec<MudTarget>,

    /// Session timing knobs.
    #[serde(default)]
    pub timing: TimingConfig,
}

/// A single whitelisted MUD host/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MudTarget {
    /// Hostname, compared case-sensitively against `set_server`.
    pub host: String,
    /// Port.
    pub port: u16,
}

/// Short admin-listing tag for a MUD host ("3k.org" -> "3k", "3scapes.org"
/// -> "3s"), derived from the label before the first dot.
pub fn server_tag(host: &str) -> String {
    let label = host.split('.').next().unwrap_or(host);
    label.chars().take(2).collect()
}

/// Timing constants governing session lifecycle and scripting behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long a non-wizard session may sit with no browser attached
    /// before the timeout sweep deletes it.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Packet-patch timeout: how long the telnet assembler waits for more
    /// bytes before releasing a partial line.
    #[serde(default = "default_packet_patch_ms")]
    pub packet_patch_ms: u64,

    /// Width of the trigger loop-detection sliding window.
    #[serde(default = "default_loop_window_secs")]
    pub loop_detection_window_secs: u64,

    /// Fire count within the window that trips loop detection.
    #[serde(default = "default_loop_threshold")]
    pub loop_detection_threshold: u32,

    /// How often the idle-timeout sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Bound on the outbound message buffer kept for a disconnected browser.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            packet_patch_ms: default_packet_patch_ms(),
            loop_detection_window_secs: default_loop_window_secs(),
            loop_detection_threshold: default_loop_threshold(),
            sweep_interval_secs: default_sweep_interval_secs(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_whitelist() -> Vec<MudTarget> {
    vec![
        MudTarget {
            host: "3k.org".to_string(),
            port: 3000,
        },
        MudTarget {
            host: "3scapes.org".to_string(),
            port: 3200,
        },
    ]
}

fn default_idle_timeout_secs() -> u64 {
    15 * 60
}

fn default_packet_patch_ms() -> u64 {
    500
}

fn default_loop_window_secs() -> u64 {
    2
}

fn default_loop_threshold() -> u32 {
    50
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_buffer_capacity() -> usize {
    150
}

impl Config {
    /// Load configuration from file with environment and CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("config file not found at {}, using defaults", path);
            Self::default_config()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_key: None,
            mud_whitelist: default_whitelist(),
            timing: TimingConfig::default(),
        }
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("failed to read config file: {e}")))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ProxyError::Config(format!("failed to parse config: {e}")))
    }

    /// `PORT` overrides the port half of `listen_addr`; `ADMIN_KEY` sets
    /// the admin key. Both take precedence over the config file, matching
    /// the usual env-overrides-file layering.
    fn apply_env_vars(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    let host = self
                        .listen_addr
                        .rsplit_once(':')
                        .map(|(host, _)| host.to_string())
                        .unwrap_or_else(|| "0.0.0.0".to_string());
                    self.listen_addr = format!("{host}:{port}");
                }
                Err(_) => tracing::warn!("invalid PORT: {}", port),
            }
        }

        if let Ok(admin_key) = std::env::var("ADMIN_KEY") {
            self.admin_key = Some(admin_key);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(listen_addr) = &cli.listen_addr {
            self.listen_addr = listen_addr.clone();
        }
    }

    /// Validate the configuration. Never silently proceed with a broken
    /// whitelist or nonsensical timing value.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ProxyError::Config(format!(
                "invalid listen_addr: {}",
                self.listen_addr
            )));
        }

        if self.mud_whitelist.is_empty() {
            return Err(ProxyError::Config(
                "mud_whitelist must not be empty".to_string(),
            ));
        }

        if self.timing.idle_timeout_secs == 0 {
            return Err(ProxyError::Config(
                "timing.idle_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.timing.loop_detection_threshold == 0 {
            return Err(ProxyError::Config(
                "timing.loop_detection_threshold must be greater than 0".to_string(),
            ));
        }

        if self.timing.buffer_capacity == 0 {
            return Err(ProxyError::Config(
                "timing.buffer_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Check whether `(host, port)` is in the whitelist (exact, case-sensitive
    /// host match per the spec's fixed whitelist).
    pub fn is_whitelisted(&self, host: &str, port: u16) -> bool {
        self.mud_whitelist
            .iter()
            .any(|t| t.host == host && t.port == port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    fn test_cli() -> Cli {
        Cli {
            config: None,
            listen_addr: None,
            verbose: false,
            command: crate::cli::Commands::Serve,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_whitelist_matches_spec() {
        let config = Config::default_config();
        assert!(config.is_whitelisted("3k.org", 3000));
        assert!(config.is_whitelisted("3scapes.org", 3200));
        assert!(!config.is_whitelisted("3k.org", 3200));
        assert!(!config.is_whitelisted("evil.example", 3000));
    }

    #[test]
    fn test_server_tag_matches_admin_listing_convention() {
        assert_eq!(server_tag("3k.org"), "3k");
        assert_eq!(server_tag("3scapes.org"), "3s");
    }

    #[test]
    fn test_empty_whitelist_invalid() {
        let mut config = Config::default_config();
        config.mud_whitelist.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_listen_addr() {
        let mut config = Config::default_config();
        config.listen_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_listen_addr_override() {
        let mut config = Config::default_config();
        let mut cli = test_cli();
        cli.listen_addr = Some("127.0.0.1:4000".to_string());
        config.apply_cli_overrides(&cli);
        assert_eq!(config.listen_addr, "127.0.0.1:4000");
    }

    #[test]
    fn test_from_file_round_trip() {
        let yaml = r#"
listen_addr: "0.0.0.0:8080"
admin_key: "s3cr3t"
mud_whitelist:
  - host: "3k.org"
    port: 3000
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mudproxy.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.admin_key.as_deref(), Some("s3cr3t"));
        assert_eq!(config.timing.idle_timeout_secs, default_idle_timeout_secs());
    }
}
