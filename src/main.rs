//! mudproxy - stateful MUD session proxy
//!
//! Main entry point: loads configuration, initializes tracing, and starts
//! the HTTP + WebSocket server.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mudproxy::cli::{Cli, Commands};
use mudproxy::config::Config;
use mudproxy::http::{self, AppState};
use mudproxy::session::store::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse_args();
    let config_path = cli.config.as_deref().unwrap_or("config/mudproxy.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::CheckConfig => {
            tracing::info!("configuration at {config_path} is valid");
            Ok(())
        }
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let store = SessionStore::new(config.clone());

    spawn_idle_sweep(store.clone(), config.timing.sweep_interval_secs);

    let state = AppState { config: config.clone(), store: store.clone() };

    let admin_routes = Router::new()
        .route("/sessions", get(http::sessions))
        .route("/broadcast", post(http::broadcast))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(state.clone(), http::admin_key_middleware)),
        );

    let app = Router::new()
        .route("/", get(http::root))
        .route("/health", get(http::health))
        .route("/discord-webhook", post(http::discord_webhook))
        .route("/ws", get(ws_upgrade))
        .merge(admin_routes)
        .with_state(state);

    tracing::info!("listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| mudproxy::ws::handle_socket(socket, state.store))
}

fn spawn_idle_sweep(store: Arc<SessionStore>, sweep_interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweep_interval_secs));
        loop {
            interval.tick().await;
            store.sweep_idle().await;
        }
    });
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mudproxy=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
