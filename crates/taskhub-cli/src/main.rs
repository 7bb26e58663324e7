//! Demo binary wiring a directory-scanning [`Source`] to a SQLite-backed
//! `Hub`. `clap` derive `Parser`/`Subcommand`, a `tracing_subscriber` init
//! at startup, `anyhow` for top-level error reporting.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use taskhub_core::config::CreateTaskOptions;
use taskhub_core::error::JobError;
use taskhub_core::hub::Hub;
use taskhub_core::source::{JobContext, Source, SourceData};
use taskhub_store_sql::SqlJobStore;

#[derive(Parser)]
#[command(name = "taskhub", version, about = "TaskHub demo CLI")]
struct Cli {
    /// Path to the SQLite database file (":memory:" for an ephemeral run).
    #[arg(long, global = true, default_value = "taskhub.db")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and run a new Task to completion, reporting file sizes.
    Run {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value = "scan")]
        name: String,
    },
    /// Resume a previously created Task against the same directory.
    Resume {
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        dir: PathBuf,
    },
    /// Print a Task's current status and progress.
    Status {
        #[arg(long)]
        task_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    path: String,
}

struct FileScanSource {
    dir: PathBuf,
}

#[async_trait]
impl Source for FileScanSource {
    type Input = FileEntry;
    type Output = u64;

    async fn get_data(&self) -> SourceData<Self::Input> {
        let entries = walkdir::WalkDir::new(&self.dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| FileEntry {
                path: e.path().display().to_string(),
        })
        .collect();
        SourceData::Deterministic(entries)
    }

    async fn handle(
        &self,
        input: Self::Input,
        _ctx: JobContext,
    ) -> std::result::Result<Self::Output, JobError> {
        let meta = tokio::fs::metadata(&input.path)
        .await
        .map_err(|e| JobError::new(format!("stat {}: {e}", input.path)))?;
        Ok(meta.len())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

    let cli = Cli::parse();
    let store = Arc::new(
        SqlJobStore::connect(&cli.db)
        .await
        .context("opening store")?,
    );

    match cli.command {
        Command::Run { dir, name } => {
            let hub = Hub::open(store).await.context("opening hub")?;
            let source = FileScanSource { dir };
            let opts = CreateTaskOptions::new(name);
            let handle = hub
            .create_task(opts, source)
            .await
            .context("creating task")?;
            println!("started task {}", handle.id());
            let status = handle.start().await.context("running task")?;
            let progress = handle.progress().await?;
            println!("finished with status {status:?}: {progress:?}");
        }
        Command::Resume { task_id, dir } => {
            let hub = Hub::open(store).await.context("opening hub")?;
            let source = FileScanSource { dir };
            let handle = hub
            .resume_task(&task_id, source)
            .await
            .context("resuming task")?;
            let status = handle.start().await.context("running task")?;
            let progress = handle.progress().await?;
            println!("finished with status {status:?}: {progress:?}");
        }
        Command::Status { task_id } => {
            let hub = Hub::open(store).await.context("opening hub")?;
            let task = hub
            .get_task(&task_id)
            .await?
            .context("task not found")?;
            println!("{task:#?}");
        }
    }

    Ok(())
}
