use anyhow::Context;
use clap::{Parser, Subcommand};
use matching_engine::sequencer::{Sequencer, SnapshotSchedule};
use matching_engine::{app, config};
use tokio::io::BufReader;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "matching-engine", about = "Order matching engine")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve newline-delimited JSON requests from stdin
    Run,
}

// stdout carries responses, so logs go to stderr
fn init_logging(cfg: &config::AppConfig) {
    match cfg.logger.format {
        config::LogFormat::JSON => {
            tracing_subscriber::fmt()
                .json()
                .with_max_level(cfg.logger.level)
                .with_current_span(true)
                .with_writer(std::io::stderr)
                .init();
        }
        config::LogFormat::COMPACT => {
            tracing_subscriber::fmt()
                .compact()
                .with_max_level(cfg.logger.level)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config =
        config::AppConfig::load(cli.config_path.as_ref()).context("could not load config")?;

    init_logging(&config);

    match cli.command {
        Commands::Run => run(config).await,
    }
}

async fn run(config: config::AppConfig) -> anyhow::Result<()> {
    let engine = app::recover(&config).context("could not recover engine state")?;
    let schedule = SnapshotSchedule::from_config(&config.snapshot, engine.sequence());
    let (handle, task) = Sequencer::spawn(engine, &config.engine, Some(schedule));
    let event_log = tokio::spawn(app::log_events(handle.subscribe()));

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    select! {
        served = app::serve(&handle, stdin, stdout) => {
            let served = served.context("request loop failed")?;
            info!(served, "input closed");
        }
        _ = shutdown_signal() => {}
    }

    match handle.shutdown().await.context("shutdown failed")? {
        Some(path) => info!(path = %path.display(), "final snapshot written"),
        None => info!("no changes since last snapshot"),
    }
    drop(handle);
    let engine = task.await.context("sequencer task panicked")?;
    event_log.abort();

    info!(sequence = engine.sequence(), halted = engine.is_halted(), "engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable");
            let _ = ctrl_c.await;
            return;
        }
    };

    select! {
        _ = ctrl_c => { },
        _ = terminate.recv() => { }
    }

    info!("shutdown signal received, exiting")
}
