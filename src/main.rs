use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vibeflow_engine::config::{AppConfig, CliConfig, FileConfig};
use vibeflow_engine::playback::{AudioSink, NullSink, OutputClock, SystemClock};
use vibeflow_engine::Coordinator;

#[derive(Parser, Debug)]
struct CliArgs {
    /// URL of the interpretation backend websocket.
    #[clap(long)]
    pub interpretation_url: Option<String>,

    /// URL of the generative-audio backend websocket.
    #[clap(long)]
    pub generation_url: Option<String>,

    /// API key sent with both backend connections.
    #[clap(long)]
    pub api_key: Option<String>,

    /// Wallet address attached to session boundary notifications.
    #[clap(long)]
    pub wallet_address: Option<String>,

    /// Path to a TOML config file. Values set there take precedence over
    /// CLI flags.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Identifier of the vibe to generate for.
    #[clap(long, default_value = "default")]
    pub vibe_id: String,

    /// Interval in seconds between engine status log lines. 0 disables them.
    #[clap(long, default_value_t = 30)]
    pub status_interval_sec: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        interpretation_url: cli_args.interpretation_url.clone(),
        generation_url: cli_args.generation_url.clone(),
        api_key: cli_args.api_key.clone(),
        wallet_address: cli_args.wallet_address.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Interpretation backend: {}", config.interpretation_url);
    info!("Generation backend: {}", config.generation_url);

    let clock: Arc<dyn OutputClock> = Arc::new(SystemClock::new());
    // Headless: frames are decoded and scheduled but not rendered. A
    // platform adapter supplies a real sink.
    let sink: Arc<dyn AudioSink> = Arc::new(NullSink);
    let coordinator = Arc::new(Coordinator::new(config, clock, sink));

    let session_id = coordinator
        .start_session(&cli_args.vibe_id)
        .context("failed to start session")?;
    info!("Session {} running, press Ctrl-C to stop", session_id);

    if cli_args.status_interval_sec > 0 {
        let status_coordinator = coordinator.clone();
        let interval = Duration::from_secs(cli_args.status_interval_sec);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let status = status_coordinator.status();
                info!(
                    "Engine status: session={:?} link_connected={:?} buffered={} dropouts={}",
                    status.session_state,
                    status.link.as_ref().map(|l| l.connected),
                    status.queued_frames,
                    status.buffer.dropout_count,
                );
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down...");
    coordinator.shutdown().await;
    Ok(())
}
