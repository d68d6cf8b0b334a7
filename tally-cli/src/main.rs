use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;
use tally_server::usage::{PersistenceError, StatisticsSnapshot, codec, resolve_path};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tally-cli")]
#[command(about = "Tally CLI - inspect and feed a running usage service", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value = "8317")]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the live usage counters
    Usage {
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },
    /// Record one usage event
    Record {
        #[arg(long)]
        api: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value_t = 0)]
        input_tokens: u64,
        #[arg(long, default_value_t = 0)]
        output_tokens: u64,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        failed: bool,
    },
    /// Ping the keep-alive endpoint
    KeepAlive {
        #[arg(long, env = "TALLY_LOCAL_PASSWORD")]
        password: String,
    },
    /// Validate a persisted usage file without modifying it
    Inspect {
        /// Path to the file (`~` is expanded)
        file: String,
    },
}

struct TallyClient {
    base_url: String,
    client: reqwest::Client,
}

impl TallyClient {
    fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            client: reqwest::Client::new(),
        }
    }

    async fn usage(&self, raw: bool) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/v0/usage", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        if raw {
            let value = res.json::<serde_json::Value>().await?;
            return Ok(serde_json::to_string_pretty(&value)?);
        }

        let snapshot = res.json::<StatisticsSnapshot>().await?;
        Ok(format_snapshot(&snapshot))
    }

    async fn record(
        &self,
        api: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        source: Option<&str>,
        failed: bool,
    ) -> Result<String> {
        self.client
            .post(format!("{}/v0/usage/records", self.base_url))
            .json(&json!({
                "api": api,
                "model": model,
                "source": source.unwrap_or_default(),
                "failed": failed,
                "tokens": {
                    "input_tokens": input_tokens,
                    "output_tokens": output_tokens
                }
            }))
            .send()
            .await?
            .error_for_status()?;

        Ok("OK".green().to_string())
    }

    async fn keep_alive(&self, password: &str) -> Result<String> {
        let res = self
            .client
            .get(format!("{}/keep-alive", self.base_url))
            .bearer_auth(password)
            .send()
            .await?;

        let status = res.status();
        let body = res.json::<serde_json::Value>().await.unwrap_or_default();
        if status.is_success() {
            Ok(format!(
                "{} (idle timeout {}s)",
                "OK".green(),
                body["timeout_secs"].as_f64().unwrap_or_default()
            ))
        } else {
            Err(anyhow::anyhow!(
                "Error ({}): {}",
                status,
                body["error"].as_str().unwrap_or("Unknown")
            ))
        }
    }
}

fn format_snapshot(snapshot: &StatisticsSnapshot) -> String {
    let mut out = format!(
        "{} {}  {} {}  {} {}  {} {}",
        "requests:".bold(),
        snapshot.total_requests,
        "ok:".bold(),
        snapshot.success_count.to_string().green(),
        "failed:".bold(),
        snapshot.failure_count.to_string().red(),
        "tokens:".bold(),
        snapshot.total_tokens
    );

    for (api, api_entry) in &snapshot.apis {
        out.push_str(&format!(
            "\n  {} ({} requests, {} tokens)",
            api.cyan(),
            api_entry.total_requests,
            api_entry.total_tokens
        ));
        for (model, model_entry) in &api_entry.models {
            out.push_str(&format!(
                "\n    {:<24} {:>8} {:>12}",
                model, model_entry.total_requests, model_entry.total_tokens
            ));
        }
    }
    out
}

/// Read-only check of a usage file: unlike a restore, corrupt files stay put
async fn inspect(file: &str) -> Result<String> {
    let path: PathBuf = resolve_path(file);
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    match codec::parse(&bytes) {
        Ok(envelope) => Ok(format!(
            "{} {}\n{} {}\n{} {}\n{}",
            "file:".bold(),
            path.display(),
            "version:".bold(),
            envelope.version,
            "saved at:".bold(),
            envelope.saved_at.to_rfc3339(),
            format_snapshot(&envelope.data)
        )),
        Err(PersistenceError::UnsupportedVersion { found, expected }) => Err(anyhow::anyhow!(
            "{} has schema version {} (this build reads version {})",
            path.display(),
            found,
            expected
        )),
        Err(e) => Err(anyhow::anyhow!("{} is not a valid usage file: {}", path.display(), e)),
    }
}

async fn execute(args: Args) -> Result<String> {
    let client = TallyClient::new(&args.host, args.port);
    match args.command {
        Command::Usage { json } => client.usage(json).await,
        Command::Record {
            api,
            model,
            input_tokens,
            output_tokens,
            source,
            failed,
        } => {
            client
                .record(&api, &model, input_tokens, output_tokens, source.as_deref(), failed)
                .await
        }
        Command::KeepAlive { password } => client.keep_alive(&password).await,
        Command::Inspect { file } => inspect(&file).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let args = Args::parse();
    let start = Instant::now();

    match execute(args).await {
        Ok(output) => {
            info!("{}", output);
            info!("{}", format!("({:.2?})", start.elapsed()).dimmed());
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "{}", format!("Error: {}", e).red());
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_server::usage::{PersistedEnvelope, RequestStatistics, UsageRecord};

    #[test]
    fn test_args_parse_record() {
        let args = Args::try_parse_from([
            "tally-cli",
            "-p",
            "9000",
            "record",
            "--api",
            "key-a",
            "--model",
            "gpt-x",
            "--input-tokens",
            "12",
            "--failed",
        ])
        .unwrap();

        assert_eq!(args.port, 9000);
        match args.command {
            Command::Record {
                api,
                input_tokens,
                failed,
                ..
            } => {
                assert_eq!(api, "key-a");
                assert_eq!(input_tokens, 12);
                assert!(failed);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_format_snapshot_lists_apis() {
        let stats = RequestStatistics::new();
        stats.record(&UsageRecord {
            api: "key-a".to_string(),
            model: "gpt-x".to_string(),
            ..Default::default()
        });

        colored::control::set_override(false);
        let text = format_snapshot(&stats.snapshot());
        assert!(text.contains("requests: 1"));
        assert!(text.contains("key-a"));
        assert!(text.contains("gpt-x"));
    }

    #[tokio::test]
    async fn test_inspect_leaves_corrupt_file_in_place() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("usage.json");
        std::fs::write(&path, b"{ nope").unwrap();

        assert!(inspect(path.to_str().unwrap()).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"{ nope");
    }

    #[tokio::test]
    async fn test_inspect_reports_valid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("usage.json");
        codec::save(&path, &PersistedEnvelope::new(StatisticsSnapshot::default()))
            .await
            .unwrap();

        colored::control::set_override(false);
        let text = inspect(path.to_str().unwrap()).await.unwrap();
        assert!(text.contains("version: 1"));
    }
}
