//! Beacon Server
//!
//! Run with: cargo run --bin beacon
//!
//! Configuration is loaded from `--config`, the default locations, or the
//! environment (`BEACON_*` variables). `--print-config` writes an annotated
//! default configuration to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beacon::announce::Announcer;
use beacon::config::{generate_default_config, Config, LoggingConfig};
use beacon::pubsub::{LocalPubSub, PubSub};
use beacon::server::{serve, AppState};

#[derive(Parser)]
#[command(name = "beacon", version, about = "Real-time event delivery server")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the annotated default configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => Config::load_default(),
    };

    init_tracing(&config.logging);
    tracing::info!("Starting beacon v{}", env!("CARGO_PKG_VERSION"));

    let announce_config = config.announce.clone();
    let server_addr = config.server.addr();

    let state = Arc::new(AppState::new(config));

    // Run the hub's control loop
    let hub_task = state.hub().map(|hub| hub.start());

    // Periodic service announcements. The binary announces over the local
    // pub/sub backend; deployments with a gateway wire a broker transport
    // through the library instead.
    let announcer = if announce_config.enabled {
        let pubsub: Arc<dyn PubSub> = Arc::new(LocalPubSub::new());
        pubsub
            .connect()
            .await
            .map_err(|e| anyhow::anyhow!("connecting announce backend: {}", e))?;

        let announcer = Arc::new(
            Announcer::new(pubsub, announce_config.topic, announce_config.name)
                .interval(std::time::Duration::from_secs(
                    announce_config.interval_secs.max(1),
                ))
                .prefix(announce_config.prefix)
                .endpoints(announce_config.endpoint, announce_config.push_endpoint),
        );

        let cancel = CancellationToken::new();
        let task = announcer.start(cancel.clone());
        Some((task, cancel))
    } else {
        None
    };

    serve(Arc::clone(&state), &server_addr)
        .await
        .context("running server")?;

    // Goodbye before the hub goes down, so the gateway stops routing to us
    // while sessions are still draining.
    if let Some((task, cancel)) = announcer {
        cancel.cancel();
        let _ = task.await;
    }

    if let Some(hub) = state.hub() {
        if let Err(error) = hub.stop().await {
            tracing::warn!(error = %error, "push hub stop failed");
        }
    }
    if let Some(task) = hub_task {
        let _ = task.await;
    }

    tracing::info!("beacon shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber from the logging configuration
fn init_tracing(logging: &LoggingConfig) {
    let directives = format!("beacon={},tower_http=info", logging.level);

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&directives)),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&directives)),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
