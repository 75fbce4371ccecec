//! Tandem Relay
//!
//! WebSocket signaling relay for two-party chat rooms:
//!
//! 1. **Room authentication**: a connection joins a room by presenting one of
//!    the two addresses the room id is made of.
//!
//! 2. **Handshake routing**: offers, answers and ICE candidates are forwarded
//!    verbatim to the other member of the room.
//!
//! 3. **Offline queue**: chat messages that find nobody to deliver to are kept
//!    and flushed, once, to the next member that authenticates.
//!
//! The relay never looks inside session descriptions or chat text.

pub mod handler;
pub mod state;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{RelayConfig, RelayState};

/// Build the relay router.
///
/// Clients may upgrade on either `/` or `/ws`.
pub fn app(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "tandem-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Snapshot of relay counters served on `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub online_connections: usize,
    pub open_connections: usize,
    pub active_rooms: usize,
    pub offline_queue_size: usize,
    pub max_offline_per_room: Option<usize>,
    pub timestamp: i64,
}

impl RelayStats {
    pub fn collect(state: &RelayState) -> Self {
        Self {
            online_connections: state.online_count(),
            open_connections: state.connection_count(),
            active_rooms: state.active_rooms(),
            offline_queue_size: state.offline_queue_size(),
            max_offline_per_room: state.config.max_offline_per_room.map(|max| max.get()),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(RelayStats::collect(&state))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_json_structure() {
        let json_val = json!({
            "status": "ok",
            "service": "tandem-relay",
            "version": env!("CARGO_PKG_VERSION"),
        });
        assert_eq!(json_val["status"], "ok");
        assert_eq!(json_val["service"], "tandem-relay");
    }

    #[test]
    fn test_stats_of_empty_relay() {
        let state = RelayState::new(RelayConfig::default());
        let stats = RelayStats::collect(&state);
        assert_eq!(stats.online_connections, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.offline_queue_size, 0);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["online_connections"], 0);
        assert!(value["max_offline_per_room"].is_null());
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_router_builds() {
        let _app = app(RelayState::new(RelayConfig::default()));
    }
}
