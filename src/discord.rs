//! Discord webhook relay
//!
//! Forwards sanitized chat lines to a Discord incoming webhook. Sending is
//! always best-effort: failures are logged, never surfaced to a session,
//! per the error handling design's "Discord is best-effort" rule.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::Serialize;

use crate::error::{ProxyError, Result};

const WEBHOOK_ORIGINS: &[&str] = &[
    "https://discord.com/api/webhooks/",
    "https://discordapp.com/api/webhooks/",
];

const MAX_MESSAGE_LEN: usize = 1997;

fn client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Reject any URL not hosted at a known Discord webhook origin.
pub fn validate_webhook_url(url: &str) -> Result<()> {
    if WEBHOOK_ORIGINS.iter().any(|origin| url.starts_with(origin)) {
        Ok(())
    } else {
        Err(ProxyError::InvalidDiscordWebhook(url.to_string()))
    }
}

/// Strip SGR sequences, neutralize `@everyone`/`@here`, redact explicit
/// user mentions (`<@id>`/`<@!id>`), and truncate to 1997 characters with
/// an ellipsis if longer.
pub fn sanitize_message(message: &str) -> String {
    static SGR: OnceLock<Regex> = OnceLock::new();
    static MENTION: OnceLock<Regex> = OnceLock::new();

    let sgr = SGR.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
    let mention = MENTION.get_or_init(|| Regex::new(r"<@!?\d+>").unwrap());

    let stripped = sgr.replace_all(message, "");
    let neutralized = stripped
        .replace("@everyone", "@\u{200b}everyone")
        .replace("@here", "@\u{200b}here");
    let redacted = mention.replace_all(&neutralized, "[redacted mention]").to_string();

    if redacted.chars().count() > MAX_MESSAGE_LEN {
        let truncated: String = redacted.chars().take(MAX_MESSAGE_LEN).collect();
        format!("{truncated}...")
    } else {
        redacted
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

/// Validate, sanitize, and forward `message` to `webhook_url`. Used by
/// trigger `discord` actions (fire-and-forget).
pub async fn send_raw(webhook_url: &str, message: &str) -> Result<()> {
    send(webhook_url, message, None).await
}

/// Validate, sanitize, and forward `message` to `webhook_url`, optionally
/// overriding the webhook's display name. Used by `POST /discord-webhook`.
pub async fn send(webhook_url: &str, message: &str, username: Option<&str>) -> Result<()> {
    validate_webhook_url(webhook_url)?;
    let sanitized = sanitize_message(message);
    let payload = WebhookPayload { content: &sanitized, username };

    let response = client().post(webhook_url).json(&payload).send().await?;
    if !response.status().is_success() {
        tracing::warn!("discord webhook returned {}", response.status());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_discord_origins() {
        assert!(validate_webhook_url("https://discord.com/api/webhooks/123/abc").is_ok());
        assert!(validate_webhook_url("https://discordapp.com/api/webhooks/123/abc").is_ok());
    }

    #[test]
    fn rejects_non_discord_origin() {
        assert!(validate_webhook_url("https://evil.example/api/webhooks/123/abc").is_err());
    }

    #[test]
    fn strips_sgr_sequences() {
        let out = sanitize_message("\x1b[31mred text\x1b[0m");
        assert_eq!(out, "red text");
    }

    #[test]
    fn neutralizes_everyone_and_here() {
        let out = sanitize_message("hello @everyone and @here");
        assert!(!out.contains("@everyone"));
        assert!(!out.contains("@here"));
        assert!(out.contains("everyone"));
    }

    #[test]
    fn redacts_explicit_user_mentions() {
        let out = sanitize_message("hey <@123456789> and <@!987654321>");
        assert_eq!(out, "hey [redacted mention] and [redacted mention]");
    }

    #[test]
    fn truncates_long_messages_with_ellipsis() {
        let long = "a".repeat(2500);
        let out = sanitize_message(&long);
        assert_eq!(out.chars().count(), MAX_MESSAGE_LEN + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn short_messages_are_unchanged() {
        let out = sanitize_message("short message");
        assert_eq!(out, "short message");
    }
}
