//! stream-relay binary
//!
//! Run with: stream-relay [--config relay.toml] [--host 127.0.0.1]
//!
//! Pushing video:
//!   ffmpeg -re -i input.ts -c copy -f mpegts http://127.0.0.1:19650/01
//!
//! Pushing status JSON:
//!   curl -T - http://127.0.0.1:13300/nicmonitor/01 < status.json
//!
//! Subscribing:
//!   ws://127.0.0.1:10002/stream/live?01

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use stream_relay::{OverflowPolicy, RelayConfig, RelayServer};

#[derive(Debug, Parser)]
#[command(name = "stream-relay", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind every listener to this address instead of the configured one
    #[arg(long)]
    host: Option<IpAddr>,

    /// Liveness probe period in milliseconds
    #[arg(long)]
    probe_interval_ms: Option<u64>,

    /// Disconnect subscribers whose queue overflows instead of dropping chunks
    #[arg(long)]
    disconnect_slow: bool,

    /// Refuse WebSocket upgrades for unknown channels
    #[arg(long)]
    reject_unknown_channels: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_relay=info,tower_http=info".into()),
        )
        .init();

    // Panics in connection tasks are isolated by the runtime; log them
    // instead of letting them scroll past on stderr.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(fault = %info, "Uncaught fault");
    }));

    let cli = Cli::parse();

    let mut config = RelayConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config = config.bind_host(host);
    }
    if let Some(ms) = cli.probe_interval_ms {
        config = config.probe_interval(Duration::from_millis(ms));
    }
    if cli.disconnect_slow {
        config = config.overflow_policy(OverflowPolicy::Disconnect);
    }
    if cli.reject_unknown_channels {
        config = config.reject_unknown_channels(true);
    }

    let server = RelayServer::bind(config).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
