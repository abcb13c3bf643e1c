//! mqstack - local message queue server
//!
//! Serves an in-memory, SQS-style queue engine over a small JSON-over-HTTP
//! protocol for development and testing.

mod config;
mod router;

use clap::Parser;
use mqstack_sqs::SqsState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{provision_queues, Config};

#[derive(Parser, Debug)]
#[command(name = "mqstack")]
#[command(about = "Local SQS-style message queue server", long_about = None)]
struct Args {
    /// Port to listen on [default: 9324]
    #[arg(short, long, env = "MQSTACK_PORT")]
    port: Option<u16>,

    /// Host to bind to [default: 0.0.0.0]
    #[arg(long, env = "MQSTACK_HOST")]
    host: Option<String>,

    /// Configuration file (any format the config crate understands)
    #[arg(short, long, env = "MQSTACK_CONFIG")]
    config: Option<String>,

    /// Period of the background visibility sweep in milliseconds; 0 disables it
    #[arg(long, env = "MQSTACK_SWEEP_INTERVAL_MS")]
    sweep_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MQSTACK_LOG_LEVEL")]
    log_level: String,
}

impl Args {
    /// Command-line values win over file and environment configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(interval) = self.sweep_interval_ms {
            config.engine.sweep_interval_ms = interval;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "mqstack={level},mqstack_sqs={level},tower_http=debug",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    info!("Starting mqstack...");
    let state = Arc::new(SqsState::with_defaults(config.queue_defaults.clone()));
    provision_queues(&state, &config.queues)?;

    let sweeper = (config.engine.sweep_interval_ms > 0).then(|| {
        Arc::clone(&state).spawn_sweeper(Duration::from_millis(config.engine.sweep_interval_ms))
    });

    let app = router::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
