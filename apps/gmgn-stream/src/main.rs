//! GMGN Stream Binary
//!
//! Connects to the GMGN feed, subscribes to the configured channels and
//! runs every event through the filter/alert/export pipeline.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin gmgn-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Connection
//! - `GMGN_WS_URL`: Feed endpoint (default: wss://gmgn.ai/ws)
//! - `GMGN_ACCESS_TOKEN`: Token for wallet and limit-order channels
//! - `GMGN_CHAIN`: Chain for chain-scoped channels (default: sol)
//! - `GMGN_CHANNELS`: Comma-separated channel names
//! - `GMGN_WALLETS`: Comma-separated wallets for `wallet_trade_data`
//!
//! ## Pipeline
//! - `GMGN_MIN_MARKET_CAP`, `GMGN_MIN_LIQUIDITY`, `GMGN_MIN_HOLDERS`, `GMGN_MAX_RISK_SCORE`
//! - `GMGN_EXPORT_FORMAT`: jsonl | csv | sqlite (default: disabled)
//! - `GMGN_EXPORT_DIR`: Export directory (default: ./exports)
//!
//! ## Service
//! - `GMGN_HEALTH_PORT`: Health/stats/metrics HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry span export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gmgn_stream::infrastructure::health::{HealthServer, HealthServerState};
use gmgn_stream::infrastructure::telemetry;
use gmgn_stream::{
    ClientConfig, ClientError, FeedClient, Pipeline, PipelineRules, TracingNotifier, build_sink,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting GMGN stream client");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let client = Arc::new(FeedClient::new(config.clone())?);

    // Pipeline: filters and alerts from settings, optional export sink
    let (pipeline, mut worker) = Pipeline::channel(
        config.pipeline.queue_capacity,
        PipelineRules::from_settings(&config.filter),
        client.stats_handle(),
    );
    worker = worker.with_notifier(Arc::new(TracingNotifier));
    if let Some(sink) = build_sink(&config.export).context("failed to open export sink")? {
        tracing::info!(sink = sink.name(), directory = %config.export.directory.display(), "Export enabled");
        worker = worker.with_sink(sink);
    }
    let pipeline_task = worker.spawn(shutdown_token.child_token());
    client.attach_pipeline(pipeline);

    // Health, stats and metrics endpoint
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        client.stats_handle(),
        client.state_watch(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    client.connect().await.context("failed to connect to GMGN feed")?;

    for channel in config.subscriptions() {
        match client.subscribe(channel.clone()) {
            Ok(_) => tracing::info!(channel = %channel, "Subscribed"),
            Err(e) => tracing::warn!(channel = %channel, error = %e, "Subscription skipped"),
        }
    }

    // Debug tap on the event stream
    let mut events = client.events();
    let debug_cancel = shutdown_token.child_token();
    let event_log = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = debug_cancel.cancelled() => break,
                next = events.next() => match next {
                    Some(Ok(event)) => tracing::debug!(
                        channel = %event.channel,
                        token = event.token_address().unwrap_or("-"),
                        duplicate = event.duplicate,
                        "Event"
                    ),
                    Some(Err(e)) => {
                        report_fatal(&e);
                        break;
                    }
                    None => break,
                },
            }
        }
    });

    tracing::info!("GMGN stream client ready");

    let mut state = client.state_watch();
    tokio::select! {
        () = await_shutdown() => {}
        _ = state.wait_for(|s| s.is_closed()) => {
            tracing::warn!("Feed connection closed");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    let shutdown = async {
        client.close().await;
        shutdown_token.cancel();
        let mut sinks = pipeline_task.shutdown().await;
        let failures = sinks.flush_all().await;
        if failures > 0 {
            tracing::warn!(failures, "Some sinks failed to flush");
        }
        if let Err(e) = event_log.await {
            tracing::debug!(error = %e, "Event log task ended abnormally");
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        tracing::warn!("Graceful shutdown timed out");
    }

    let stats = client.stats();
    tracing::info!(
        uptime_secs = stats.uptime_secs,
        messages = stats.messages_received,
        unique_tokens = stats.unique_tokens,
        exported = stats.exported,
        dropped = stats.dropped_count,
        alerts = stats.alerts_fired,
        "GMGN stream client stopped"
    );
    Ok(())
}

fn report_fatal(error: &ClientError) {
    tracing::error!(error = %error, "Feed stream ended with error");
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        chain = %config.chain,
        channels = config.channels.len(),
        wallets = config.wallets.len(),
        authenticated = config.access_token.is_some(),
        health_port = config.server.health_port,
        queue_capacity = config.pipeline.queue_capacity,
        "Configuration loaded"
    );
    tracing::debug!(url = %config.url, "WebSocket endpoint");
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
