//! Server-side scripting: triggers, aliases, tickers
//!
//! This is the part of the proxy that must keep running with no browser
//! attached — moving it client-side would break the core guarantee that
//! automation survives a browser disconnect.

pub mod alias;
pub mod ticker;
pub mod trigger;

use serde::{Deserialize, Serialize};

/// A single trigger action. Templates may reference `%0..%99` captures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Gag,
    Highlight {
        #[serde(default)]
        fg: Option<String>,
        #[serde(default)]
        bg: Option<String>,
        #[serde(default)]
        blink: bool,
        #[serde(default)]
        underline: bool,
    },
    Command {
        template: String,
    },
    Substitute {
        template: String,
    },
    Sound {
        name: String,
    },
    Discord {
        #[serde(rename = "webhookUrl")]
        webhook_url: String,
        message: String,
    },
    Chatmon {
        message: String,
        channel: String,
    },
}

/// A server-side trigger: `(pattern, actions)` evaluated against every
/// rendered line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub name: String,
    pub pattern: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub actions: Vec<Action>,
}

fn default_true() -> bool {
    true
}

/// How an alias pattern is matched against an outgoing command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MatchType {
    Exact,
    StartsWith,
    Tintin,
    Regex,
}

/// An ordered rule rewriting an outgoing command before it reaches the MUD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub pattern: String,
    #[serde(rename = "matchType")]
    pub match_type: MatchType,
    pub replacement: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A periodic emitter of a command string, processed through aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(rename = "intervalSecs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Split `command` on unescaped semicolons or newlines at brace-depth 0,
/// trimming each resulting part. Shared by the alias expander's top-level
/// split and its recursive re-application.
pub(crate) fn split_unbraced(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                current.push(c);
            }
            ';' | '\n' if depth <= 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}
