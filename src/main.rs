//! MQTT synthetic traffic generator - Main Entry Point

use mqtt_traffic_gen::config::PublisherConfig;
use mqtt_traffic_gen::observability::{init_default_logging, metrics::metrics, HealthServer};
use mqtt_traffic_gen::publisher::PublishLoop;
use mqtt_traffic_gen::transport::mqtt::SessionManager;
use mqtt_traffic_gen::{publish_span, session_span, PublisherResult};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, Instrument};

/// Publishes numbered test messages to an MQTT broker
#[derive(Parser)]
#[command(name = "mqtt-traffic-gen")]
#[command(about = "Synthetic MQTT traffic generator")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_TRAFFIC_GEN_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and publish until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!(
        "Starting MQTT traffic generator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match PublisherConfig::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_publisher(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_publisher(config: PublisherConfig) -> PublisherResult<()> {
    let identity = config.build_identity()?;
    info!(
        client_id = identity.client_id(),
        broker = %identity.broker_address(),
        "Publisher identity ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Signal handlers first, so an early Ctrl-C is never lost
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let manager = SessionManager::new(config.reconnect.clone(), config.keep_alive());
    let mut session = {
        let _span = session_span!(client_id = identity.client_id()).entered();
        manager.establish(&identity)
    };

    let health_handle = match config.observability.health_port {
        Some(port) => {
            let server = Arc::new(HealthServer::new(
                identity.client_id(),
                port,
                session.subscribe_state(),
            ));
            let (_, handle) = server.spawn(shutdown_rx.clone())?;
            Some(handle)
        }
        None => None,
    };

    let mut publish_loop = PublishLoop::from_config(&config.publish);
    let span = publish_span!(topic = %config.publish.topic, qos = %config.publish.qos);

    let report = {
        let run = publish_loop
            .run(&session, shutdown_rx.clone())
            .instrument(span);
        tokio::pin!(run);

        tokio::select! {
            report = &mut run => report,
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                let _ = shutdown_tx.send(true);
                run.await
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                let _ = shutdown_tx.send(true);
                run.await
            }
        }
    };

    session.shutdown().await;

    if let Some(handle) = health_handle {
        let _ = shutdown_tx.send(true);
        if let Err(e) = handle.await {
            error!("Health server task failed: {}", e);
        }
    }

    let snapshot = metrics().get_metrics();
    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        next_sequence = report.next_sequence,
        connection_attempts = snapshot.session.connection_attempts,
        connections_lost = snapshot.session.connections_lost,
        "Publisher stopped"
    );

    Ok(())
}

fn handle_config_command(config: &PublisherConfig, show: bool) -> PublisherResult<()> {
    if show {
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}
