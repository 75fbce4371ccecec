//! Client configuration.

use std::time::Duration;

use crate::wallet::RetryPolicy;

/// Default relay endpoint
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:9000/ws";

/// Default STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default wait before a session starts, letting the wallet finish connecting
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default wait before reconnecting a lost relay link
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Configuration for a [`SignalingClient`](crate::client::SignalingClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling relay
    pub relay_url: String,
    /// Wait before the session starts
    pub settle_delay: Duration,
    /// Retry schedule for wallet address lookups
    pub wallet_retry: RetryPolicy,
    /// Wait before reconnecting a lost relay link
    pub reconnect_delay: Duration,
    /// ICE servers handed to the peer-connection engine
    pub ice_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            wallet_retry: RetryPolicy::default(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at `relay_url`.
    pub fn with_relay(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }
}
