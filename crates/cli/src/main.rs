//! vigil-monitor: batch anomaly detection over exported user activity.
//!
//! Each `run` trains a fresh model per signal on its baseline export,
//! scores the recent export, fuses the results per user and appends them
//! to `anomaly_alerts`.

mod cli;
mod inputs;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use vigil_compute::{DetectionMode, Pipeline};
use vigil_core::config::{self, Config};
use vigil_core::SignalType;
use vigil_storage::{persist, AlertQuery, MemorySink, PgAlertSink, StoredAlert};

use crate::cli::{Cli, Command, RunArgs};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    config::load_dotenv();
    let cli = Cli::parse();

    let config = match cli.profile.as_deref() {
        Some(p) => Config::for_profile(p),
        None => Config::from_env(),
    };
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Alerts => {
            let sink = connect(&config).await?;
            print_alerts(&sink.bad_alerts().await?)
        }
        Command::ReviewAnomalies { threshold } => {
            let threshold = threshold.unwrap_or(config.detection.threshold);
            let sink = connect(&config).await?;
            print_alerts(&sink.review_anomalies(threshold).await?)
        }
        Command::Process { dry_run } => {
            let sink = connect(&config).await?;
            process(&sink, dry_run).await.map(|_| ())
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
            Ok(())
        }
    }
}

async fn run(mut config: Config, args: RunArgs) -> Result<()> {
    if let Some(dir) = &args.log_dir {
        config.inputs.log_dir = dir.clone();
    }
    config.log_summary();

    let mode = DetectionMode::from(args.mode);
    let pipeline = Pipeline::new(config.detection.clone())?
        .with_mode(mode)
        .with_failure_policy(args.failure_policy());

    let batches = inputs::load_batches(&config.inputs);
    let output = tokio::task::spawn_blocking(move || pipeline.run(&batches))
        .await
        .context("detection task panicked")??;

    for failed in output.report.failed_signals() {
        warn!(
            signal = %failed.signal,
            error = failed.error.as_deref().unwrap_or_default(),
            "signal skipped this run"
        );
    }

    if args.dry_run {
        let sink = MemorySink::new();
        let written = persist(&sink, &output.alerts).await?;
        info!(rows = written, "dry run, nothing written to PostgreSQL");
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "report": output.report,
                "alerts": output.alerts,
            }))?
        );
        return Ok(());
    }

    let sink = connect(&config).await?;
    if !args.no_migrate {
        sink.migrate().await?;
    }
    let written = persist(&sink, &output.alerts).await?;
    info!(
        run_id = %output.run_id(),
        rows = written,
        bad = output.report.bad_alerts,
        "run complete"
    );
    Ok(())
}

/// Report every unprocessed alert and flag the batch as processed.
/// Acting on the account itself is left to the downstream consumer.
async fn process(queue: &dyn AlertQuery, dry_run: bool) -> Result<usize> {
    let pending = queue.unprocessed_alerts().await?;
    if pending.is_empty() {
        info!("no unprocessed alerts");
        return Ok(0);
    }
    for alert in &pending {
        info!(
            id = alert.id,
            user_id = alert.user(),
            status = alert.status.as_deref().unwrap_or("-"),
            "alert handed off"
        );
    }
    print_alerts(&pending)?;
    if dry_run {
        info!(pending = pending.len(), "dry run, alerts left unprocessed");
        return Ok(0);
    }

    let ids: Vec<i64> = pending.iter().map(|a| a.id).collect();
    let marked = queue.mark_processed(&ids).await?;
    info!(marked, "alerts marked processed");
    Ok(marked)
}

async fn connect(config: &Config) -> Result<PgAlertSink> {
    PgAlertSink::connect(&config.postgres)
        .await
        .with_context(|| format!("connecting to PostgreSQL at {}", config.postgres.host))
}

fn print_alerts(alerts: &[StoredAlert]) -> Result<()> {
    if alerts.is_empty() {
        println!("no alerts");
        return Ok(());
    }
    println!(
        "{:>8}  {:>10}  {:>10}  {:>6}  {:>10}  {:>7}  {:>6}  created",
        "id",
        "user",
        SignalType::FailedLogin.label(),
        "count",
        SignalType::ReviewRate.label(),
        "count",
        "status"
    );
    for a in alerts {
        println!(
            "{:>8}  {:>10}  {:>10}  {:>6}  {:>10}  {:>7}  {:>6}  {}",
            a.id,
            a.user(),
            fmt_opt(a.login_anomaly_score),
            fmt_opt(a.failed_logins),
            fmt_opt(a.review_anomaly_score),
            fmt_opt(a.reviews_last_5m),
            a.status.as_deref().unwrap_or("-"),
            a.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

fn fmt_opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map_or_else(|| "-".to_string(), |v| v.to_string())
}
