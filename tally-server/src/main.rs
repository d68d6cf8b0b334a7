use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tally_server::config::LoggingConfig;
use tally_server::lifecycle::wait_for_cloud_deploy;
use tally_server::{LifecycleCoordinator, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tally-server")]
#[command(about = "Usage statistics service with on-disk persistence", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Password accepted for local management requests; enables the
    /// keep-alive idle shutdown
    #[arg(long, env = "TALLY_LOCAL_PASSWORD", hide_env_values = true)]
    local_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.config.exists() {
        init_tracing(&LoggingConfig::default());
        wait_for_cloud_deploy().await;
        return Ok(());
    }

    let config = ServerConfig::from_file(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    init_tracing(&config.logging);

    info!("Starting Tally Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Using config {}", args.config.display());

    let mut coordinator = LifecycleCoordinator::new(config);
    if let Some(password) = args.local_password {
        coordinator = coordinator.with_local_password(password);
    }

    coordinator
        .run_until_signal()
        .await
        .context("usage service failed to start")?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
