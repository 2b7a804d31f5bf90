//! mudproxy - stateful MUD session proxy
//!
//! Bridges browser WebSocket connections to telnet MUD servers, running
//! server-side triggers, aliases and tickers so scripted automation keeps
//! running when the browser disconnects.
//!
//! # Architecture
//!
//! - `telnet`: IAC stripping and line reassembly over the MUD's raw bytes
//! - `ansi`: SGR color continuity across line boundaries
//! - `mip`: the in-band MIP side-channel decoder
//! - `pattern`: TinTin-style pattern compilation shared by triggers and aliases
//! - `script`: trigger engine, alias expander, ticker scheduler
//! - `session`: session lifecycle, the MUD TCP connection, the session store
//! - `ws`: the WebSocket JSON protocol and dispatcher
//! - `http`: the HTTP control plane
//! - `discord`: outbound Discord webhook relay
//! - `config`: configuration loading and validation
//! - `error`: error types and the result alias
//! - `cli`: command-line interface definition

pub mod ansi;
pub mod cli;
pub mod config;
pub mod discord;
pub mod error;
pub mod http;
pub mod mip;
pub mod pattern;
pub mod script;
pub mod session;
pub mod telnet;
pub mod ws;

pub use config::Config;
pub use error::{ProxyError, Result};
