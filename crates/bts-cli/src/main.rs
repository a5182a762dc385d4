//! bts - inspect a background task registry without touching it.

use std::path::Path;

use anyhow::{Context, Result};
use bts_core::{BtsError, SchedulerConfig, TaskId};
use bts_scheduler::{ScheduledTaskRecord, TaskRegistry};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bts", version, about = "Background task registry inspector")]
struct Cli {
    /// Config file (defaults to ~/.bts/bts.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every scheduled task
    List,
    /// Print one task's stored description as JSON
    Show {
        /// Task id
        id: TaskId,
    },
    /// Print the last OS version the scheduler observed
    State,
}

fn main() {
    let cli = Cli::parse();

    let loaded = SchedulerConfig::load(cli.config.as_deref());
    let config = loaded.as_ref().cloned().unwrap_or_default();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.as_str().into()),
        )
        .init();

    if let Err(e) = &loaded {
        warn!("config load failed ({e}), using defaults");
    }

    if let Err(e) = run(cli.command, &config) {
        match e.downcast_ref::<BtsError>() {
            Some(bts) => eprintln!("error [{}]: {bts}", bts.code()),
            None => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}

fn run(command: Commands, config: &SchedulerConfig) -> Result<()> {
    let db_path = &config.database.path;
    if !Path::new(db_path).exists() {
        return Err(BtsError::Config(format!("no registry at {db_path}")).into());
    }
    info!(path = %db_path, "opening registry read-only");
    let registry = TaskRegistry::open_read_only(db_path)
        .with_context(|| format!("opening registry {db_path}"))?;

    match command {
        Commands::List => {
            let records = registry.records()?;
            if records.is_empty() {
                println!("no scheduled tasks");
            }
            for record in &records {
                println!("{}", render_record(record));
            }
        }
        Commands::Show { id } => {
            let record = registry
                .get(id)?
                .ok_or(BtsError::TaskNotFound { id: id.get() })?;
            let doc: serde_json::Value = serde_json::from_str(&record.encoded_task_info)
                .map_err(BtsError::Serialization)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Commands::State => match registry.last_os_version()? {
            Some(version) => println!("last observed OS version: {version}"),
            None => println!("no OS version recorded yet"),
        },
    }
    Ok(())
}

/// One `list` line: id, timing kind, backend, persistence, scheduling time.
fn render_record(record: &ScheduledTaskRecord) -> String {
    let kind = match record.task_info() {
        Ok(task) => task.timing().kind().to_string(),
        Err(e) => {
            warn!(task_id = %record.task_id, "unreadable record: {e}");
            "corrupt".to_string()
        }
    };
    let backend = record.backend.as_str();
    let scheduled = DateTime::<Utc>::from_timestamp_millis(record.scheduled_at_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| record.scheduled_at_ms.to_string());
    let persisted = if record.persisted { "persisted" } else { "transient" };
    format!(
        "{:>8}  {kind:<9}  {backend:<15}  {persisted:<9}  {scheduled}",
        record.task_id.get()
    )
}
