//! HTTP control plane
//!
//! `GET /` (human summary), `GET /health`, `GET /sessions` (admin-key),
//! `POST /broadcast` (admin-key), `POST /discord-webhook`.

use std::sync::Arc;

use axum::extract::{Json, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::session::store::SessionStore;

/// Shared application state for the HTTP and WebSocket routers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SessionStore>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn admin_check(headers: &HeaderMap, config: &Config) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    let Some(configured_key) = &config.admin_key else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody { error: "admin key is not configured on this server".to_string() }),
        ));
    };
    let provided = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
    if provided == Some(configured_key.as_str()) {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, Json(ErrorBody { error: "invalid or missing admin key".to_string() })))
    }
}

/// `tower`/axum middleware gating the admin routes (`/sessions`,
/// `/broadcast`) on the `x-admin-key` header, applied via a
/// `tower::ServiceBuilder` layer in `main.rs` rather than checked inline
/// in each handler.
pub async fn admin_key_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Err(err) = admin_check(&headers, &state.config) {
        return err.into_response();
    }
    next.run(request).await
}

pub async fn root() -> impl IntoResponse {
    "mudproxy: stateful MUD session proxy. See /health and /sessions."
}

#[derive(Debug, Serialize)]
struct HealthBody {
    version: String,
    sessions: usize,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.store.list_summaries().await.len();
    Json(HealthBody { version: env!("CARGO_PKG_VERSION").to_string(), sessions })
}

/// Gated by [`admin_key_middleware`]; this handler assumes the key has
/// already been checked.
pub async fn sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.list_summaries().await).into_response()
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

/// Gated by [`admin_key_middleware`]; this handler assumes the key has
/// already been checked.
pub async fn broadcast(
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequest>,
) -> impl IntoResponse {
    let timestamp = chrono::Utc::now().to_rfc3339();
    state.store.broadcast(&body.message, &timestamp).await;
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
pub struct DiscordWebhookRequest {
    #[serde(rename = "webhookUrl")]
    pub webhook_url: String,
    pub message: String,
    #[serde(default)]
    pub username: Option<String>,
}

pub async fn discord_webhook(Json(body): Json<DiscordWebhookRequest>) -> impl IntoResponse {
    if crate::discord::validate_webhook_url(&body.webhook_url).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody { error: "webhookUrl is not a Discord webhook origin".to_string() }),
        )
            .into_response();
    }

    match crate::discord::send(&body.webhook_url, &body.message, body.username.as_deref()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::warn!("discord send failed: {e}");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_check_rejects_missing_key_when_unconfigured() {
        let config = test_config();
        let headers = HeaderMap::new();
        assert!(admin_check(&headers, &config).is_err());
    }

    #[test]
    fn admin_check_rejects_wrong_key() {
        let mut config = test_config();
        config.admin_key = Some("right".to_string());
        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", "wrong".parse().unwrap());
        assert!(admin_check(&headers, &config).is_err());
    }

    #[test]
    fn admin_check_accepts_matching_key() {
        let mut config = test_config();
        config.admin_key = Some("right".to_string());
        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", "right".parse().unwrap());
        assert!(admin_check(&headers, &config).is_ok());
    }

    fn test_config() -> Config {
        serde_yaml::from_str(
            r#"
listen_addr: "0.0.0.0:3000"
mud_whitelist:
  - host: "3k.org"
    port: 3000
"#,
        )
        .unwrap()
    }
}
