use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slack_exporter::{ApiClient, Config, Daemon, Downloader, ExportSession, Orchestrator, Storage};

const DATA_DIR: &str = "data";

#[derive(Parser)]
#[command(name = "slack-exporter", version, about = "Slack workspace export tool")]
struct Cli {
    /// Session name used to namespace the output; overridden by the
    /// userName setting when that is present
    name: Option<String>,

    /// Path to the settings file
    #[arg(short, long, default_value = "settings.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("slack_exporter=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::load(&cli.config));

    let session = ExportSession::new(Path::new(DATA_DIR), &config.user_name, cli.name.as_deref());
    session
        .scaffold()
        .with_context(|| format!("failed to initialize session directory [{}]", session.label()))?;
    tracing::info!("Export session [{}]", session.label());

    let storage = Arc::new(Storage::from_config(&config, &session));
    let api = ApiClient::new(config.token.clone()).context("failed to build API client")?;
    let downloader = Arc::new(Downloader::new(&config, &session).context("failed to build downloader")?);

    let orchestrator = Orchestrator::new(api, storage, downloader, config.clone());

    if config.auto_update.enabled {
        let daemon = Arc::new(Daemon::new(orchestrator).context("failed to start daemon")?);
        daemon.run().await;
    } else {
        orchestrator.run(false).await?;
    }

    Ok(())
}
