//! Scenario E — Takeover, end to end through the public session store API.
//!
//! S1 authenticates, disconnects its browser, and accumulates buffered
//! messages. A second `auth` with the same token takes the session over:
//! S1 must receive `session_taken`, and the new connection must receive
//! `session_resumed` with none of S1's buffered content.

use std::sync::Arc;

use mudproxy::config::{Config, MudTarget, TimingConfig};
use mudproxy::session::store::SessionStore;
use mudproxy::session::PendingAuth;
use mudproxy::ws::{Inbound, Outbound};

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        listen_addr: "127.0.0.1:0".to_string(),
        admin_key: None,
        mud_whitelist: vec![MudTarget { host: "3k.org".to_string(), port: 3000 }],
        timing: TimingConfig::default(),
    })
}

fn auth(token: &str) -> PendingAuth {
    PendingAuth {
        token: token.to_string(),
        user_id: Some("user-1".to_string()),
        character_id: Some("char-1".to_string()),
        character_name: Some("Gandalf".to_string()),
        is_wizard: false,
    }
}

/// S1's tab stays open while a second tab authenticates with the same
/// token. S1 is the one that should be kicked.
#[tokio::test]
async fn live_takeover_notifies_previous_connection() {
    let token = "a".repeat(64);
    let store = SessionStore::new(test_config());

    let (s1, mut s1_rx) = store.authenticate(auth(&token)).await.unwrap();
    assert_eq!(s1_rx.recv().await, Some(Outbound::SessionNew {}));

    let (s2, mut s2_rx) = store.authenticate(auth(&token)).await.unwrap();
    assert!(Arc::ptr_eq(&s1, &s2), "takeover must reuse the existing session, not create a new one");

    assert_eq!(
        s1_rx.recv().await,
        Some(Outbound::SessionTaken {
            message: "Your session was taken over from another connection.".to_string()
        })
    );
    assert_eq!(s1_rx.recv().await, None, "S1's channel is retired after the takeover notice");

    assert_eq!(s2_rx.recv().await, Some(Outbound::SessionResumed { mud_connected: false }));
}

/// S1's browser tab closes (no one left to notify), messages pile up in
/// the session buffer, and the browser comes back with the same token.
/// The reconnect must discard everything that piled up while it was gone.
#[tokio::test]
async fn reconnect_after_disconnect_discards_buffered_messages() {
    let token = "b".repeat(64);
    let store = SessionStore::new(test_config());

    let (s1, mut s1_rx) = store.authenticate(auth(&token)).await.unwrap();
    assert_eq!(s1_rx.recv().await, Some(Outbound::SessionNew {}));

    s1.detach_browser().await;
    assert_eq!(s1_rx.recv().await, None, "no live socket remains to notify once detached");

    for _ in 0..5 {
        s1.dispatch(Inbound::SetServer { host: "evil.example".to_string(), port: 1 }).await;
    }

    let (s2, mut s2_rx) = store.authenticate(auth(&token)).await.unwrap();
    assert!(Arc::ptr_eq(&s1, &s2));

    assert_eq!(s2_rx.recv().await, Some(Outbound::SessionResumed { mud_connected: false }));

    let drained = tokio::time::timeout(std::time::Duration::from_millis(100), s2_rx.recv()).await;
    assert!(drained.is_err(), "the reconnecting browser must not see any of the 5 buffered messages");
}
