//! Tandem relay server binary.

use std::num::NonZeroUsize;

use clap::Parser;
use tandem_relay::state::DEFAULT_PORT;
use tandem_relay::{app, RelayConfig, RelayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tandem-relay", version, about = "Tandem signaling relay server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "RELAY_PORT")]
    port: u16,

    /// Maximum queued offline messages per room, at least 1 (unbounded when unset)
    #[arg(long, env = "MAX_OFFLINE_PER_ROOM")]
    max_offline_per_room: Option<NonZeroUsize>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tandem_relay=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = RelayConfig {
        port: args.port,
        max_offline_per_room: args.max_offline_per_room,
    };
    match config.max_offline_per_room {
        Some(max) => tracing::info!(max = max.get(), "Offline queue bounded per room"),
        None => tracing::info!("Offline queue unbounded"),
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let state = RelayState::new(config);

    tracing::info!("Tandem relay server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await
}
