//! Command-line interface definition for mudproxy
//!
//! Defines the CLI structure using clap's derive API. The proxy is a
//! long-running service; `serve` (the default) starts it, `check-config`
//! validates a config file without binding any sockets.

use clap::{Parser, Subcommand};

/// mudproxy - stateful MUD session proxy
///
/// Bridges browser WebSocket connections to telnet MUD servers, running
/// server-side triggers, aliases and tickers so automation survives
/// browser disconnects.
#[derive(Parser, Debug, Clone)]
#[command(name = "mudproxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/mudproxy.yaml")]
    pub config: Option<String>,

    /// Override the listen address (host:port), takes precedence over
    /// config file and the `PORT` env var's port-only override
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mudproxy.
#[derive(Subcommand, Debug, Clone, Default)]
pub enum Commands {
    /// Start the proxy server (default)
    #[default]
    Serve,

    /// Load and validate configuration, then exit
    CheckConfig,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::parse_from(["mudproxy"]);
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn test_parse_check_config() {
        let cli = Cli::parse_from(["mudproxy", "check-config"]);
        assert!(matches!(cli.command, Commands::CheckConfig));
    }

    #[test]
    fn test_parse_listen_addr_override() {
        let cli = Cli::parse_from(["mudproxy", "--listen-addr", "127.0.0.1:9000", "serve"]);
        assert_eq!(cli.listen_addr.as_deref(), Some("127.0.0.1:9000"));
    }
}
