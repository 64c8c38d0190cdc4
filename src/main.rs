use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use energyme_sync::{
    TelemetryEngine,
    config::{Config, defaults::DEFAULT_CONFIG_FILE},
    coordinator::RefreshOutcome,
    identity::InMemoryRegistry,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "energyme-sync")]
#[command(version)]
#[command(about = "Telemetry synchronization engine for EnergyMe energy monitors")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the device continuously and serve the read API (default)
    Run {
        /// Do not start the read API even if enabled in config
        #[arg(long)]
        no_web: bool,
    },
    /// Check that the device is reachable and accepts the credentials
    Verify,
    /// Poll both pipelines once and print the snapshots as JSON
    Once,
    /// Write a default configuration file
    InitConfig,
}

fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("energyme_sync={level}").into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);

    let command = cli.command.unwrap_or(Command::Run { no_web: false });
    if let Command::InitConfig = command {
        Config::write_default(&cli.config)?;
        return Ok(());
    }

    info!("Starting energyme-sync v{}", env!("CARGO_PKG_VERSION"));
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    info!("Configuration loaded: {:?}", config.device);

    let engine = TelemetryEngine::new(&config, Arc::new(InMemoryRegistry::default()))?;

    match command {
        Command::Verify => {
            engine.verify().await?;
            info!("Connection to {} verified", config.device.host);
            Ok(())
        }
        Command::Once => poll_once(&engine).await,
        Command::Run { no_web } => run(engine, &config, !no_web && config.web.enabled).await,
        Command::InitConfig => Ok(()),
    }
}

async fn poll_once(engine: &TelemetryEngine) -> Result<()> {
    for (name, outcome) in [
        ("system", engine.refresh_system().await),
        ("meter", engine.refresh_meter().await),
    ] {
        if let RefreshOutcome::Failed(e) = outcome {
            bail!("{name} poll failed: {e}");
        }
    }

    let output = json!({
        "system": engine.system().current().map(|(s, _)| (*s).clone()),
        "meter": engine.meter().current().map(|(s, _)| (*s).clone()),
        "identity": engine.identity().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(engine: TelemetryEngine, config: &Config, serve_web: bool) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let web_task = if serve_web {
        let server = WebServer::new(&config.web, AppState::from_engine(&engine))?;
        let token = shutdown.child_token();
        Some(tokio::spawn(async move {
            if let Err(e) = server.serve_with_cancellation(token).await {
                error!("Read API failed: {}", e);
            }
        }))
    } else {
        None
    };

    let started = engine.start_until(&shutdown).await.inspect_err(|e| {
        if e.requires_reauth() {
            error!("Device rejected credentials, update them and restart: {}", e);
        }
    });
    if let Ok(true) = started {
        info!("Engine running, press Ctrl+C to stop");
        shutdown.cancelled().await;
    }

    engine.stop().await;
    shutdown.cancel();
    if let Some(task) = web_task {
        if let Err(e) = task.await {
            error!("Read API task ended abnormally: {}", e);
        }
    }
    started.map(|_| ()).map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
