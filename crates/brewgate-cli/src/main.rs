use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use brewgate_core::config::GatewayConfig;
use brewgate_core::telemetry;

mod demo;
mod http;
mod wiring;

#[derive(Parser)]
#[command(name = "brewgate")]
#[command(about = "Order pipeline and device gateway for the cafe machines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the order pipeline and the HTTP command endpoint
    Serve,

    /// Run the order pipeline only
    Pipeline,

    /// Seed four orders into in-memory backends and run them to completion
    Demo {
        /// Print progress this often (milliseconds)
        #[arg(long, default_value_t = 1000)]
        report_ms: u64,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 120)]
        deadline_secs: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = telemetry::init_tracing(&config.log_level) {
        eprintln!("failed to initialise tracing: {err}");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(shutdown.clone()));

    let result = match cli.command {
        Commands::Serve => serve(&config, shutdown).await,
        Commands::Pipeline => pipeline(&config, shutdown).await,
        Commands::Demo {
            report_ms,
            deadline_secs,
        } => {
            demo::run(
                &config,
                Duration::from_millis(report_ms),
                Duration::from_secs(deadline_secs),
                shutdown,
            )
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("brewgate exited with an error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("ctrl-c received, shutting down");
    }
    shutdown.cancel();
}

async fn serve(config: &GatewayConfig, shutdown: CancellationToken) -> Result<()> {
    let gateway = wiring::gateway(config).await?;
    let dispatcher = Arc::new(gateway.dispatcher());
    let devices = gateway.devices().clone();
    let handle = gateway.start();

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!(addr = %config.http_addr, "command endpoint listening");

    let served = axum::serve(listener, http::router(dispatcher))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("command endpoint failed");

    handle.shutdown_and_join().await;
    let _ = devices.disconnect_all().await;
    served
}

async fn pipeline(config: &GatewayConfig, shutdown: CancellationToken) -> Result<()> {
    let gateway = wiring::gateway(config).await?;
    let devices = gateway.devices().clone();
    let handle = gateway.start();

    shutdown.cancelled().await;

    handle.shutdown_and_join().await;
    let _ = devices.disconnect_all().await;
    Ok(())
}
