//! Run command - process the source folder and file receipts into the destination.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use slips_core::models::config::{SlipsConfig, StorageBackend};
use slips_core::{IntakeRun, RelocationStatus, RunEvent, RunReport};

use super::{Store, load_config, open_classifier};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Source folder name
    #[arg(long)]
    source: Option<String>,

    /// Destination folder name
    #[arg(long)]
    destination: Option<String>,

    /// Use a local directory as storage instead of Google Drive
    #[arg(long, value_name = "DIR")]
    local: Option<PathBuf>,

    /// Number of items processed concurrently
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Classify and name, but do not upload or delete
    #[arg(long)]
    dry_run: bool,

    /// Upload renamed images but keep the originals
    #[arg(long)]
    keep_originals: bool,

    /// Write a per-item CSV summary
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,

    /// OAuth token file for Google Drive
    #[arg(long, value_name = "FILE")]
    token: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut SlipsConfig) {
        if let Some(source) = &self.source {
            config.storage.source_folder = source.clone();
        }
        if let Some(destination) = &self.destination {
            config.storage.destination_folder = destination.clone();
        }
        if let Some(root) = &self.local {
            config.storage.backend = StorageBackend::Local;
            config.storage.local_root = root.clone();
        }
        if let Some(token) = &self.token {
            config.storage.token_path = token.clone();
        }
        if let Some(jobs) = self.jobs {
            config.pipeline.workers = jobs.max(1);
        }
        if self.keep_originals {
            config.relocation.delete_originals = false;
        }
    }
}

/// One line of the CSV summary.
#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    id: &'a str,
    name: &'a str,
    status: &'static str,
    file_name: &'a str,
    error_kind: String,
    error: &'a str,
}

pub async fn run(args: RunArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    args.apply(&mut config);

    let store = Store::open(&config).await?;
    let classifier = open_classifier(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Cancelling after in-flight items...", style("!").yellow());
            on_signal.cancel();
        }
    });

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let intake = IntakeRun::new(store.as_dyn(), classifier, &config).with_dry_run(args.dry_run);
    let report = intake
        .execute(&cancel, |event| match event {
            RunEvent::Listed { count } => pb.set_length(count as u64),
            RunEvent::ItemFinished(outcome) => {
                pb.set_message(outcome.item().name.clone());
                pb.inc(1);
            }
            RunEvent::Relocating { count } => {
                pb.set_message(format!("relocating {} item(s)", count));
            }
        })
        .await;
    pb.finish_and_clear();

    drop(intake);
    let closed = store.close().await;
    let report = report?;
    closed?;

    if let Some(path) = &args.summary {
        write_summary(path, &report)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            path.display()
        );
    }

    print_report(&report, start);
    Ok(())
}

fn print_report(report: &RunReport, start: Instant) {
    let summary = report.summary();

    println!();
    println!(
        "{} Listed {} item(s) in {:?}",
        style("✓").green(),
        summary.listed,
        start.elapsed()
    );
    if report.dry_run {
        println!("   {} processed (dry run, nothing moved)", style(summary.processed).green());
        for item in &report.pipeline.processed {
            println!("  - {} -> {}", item.source.name, item.file_name);
        }
    } else {
        println!(
            "   {} processed, {} relocated, {} failed",
            style(summary.processed).green(),
            style(summary.relocated).green(),
            style(summary.failed).red()
        );
    }
    if summary.cancelled > 0 {
        println!("   {} cancelled", style(summary.cancelled).yellow());
    }

    if !summary.failures.is_empty() {
        println!();
        println!("{}", style("Failed items:").red());
        for (id, error) in &summary.failures {
            println!("  - {}: {} ({})", id, error.kind, error.message);
        }
    }
}

fn write_summary(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    for outcome in &report.relocations {
        let (status, error_kind, error) = match &outcome.status {
            RelocationStatus::Moved { .. } => ("moved", String::new(), ""),
            RelocationStatus::Uploaded { .. } => ("uploaded", String::new(), ""),
            RelocationStatus::Failed { error, .. } => {
                ("failed", error.kind.to_string(), error.message.as_str())
            }
            RelocationStatus::Cancelled => ("cancelled", String::new(), ""),
        };
        wtr.serialize(SummaryRow {
            id: &outcome.source.id,
            name: &outcome.source.name,
            status,
            file_name: &outcome.file_name,
            error_kind,
            error,
        })?;
    }

    if report.relocations.is_empty() {
        for item in &report.pipeline.processed {
            wtr.serialize(SummaryRow {
                id: &item.source.id,
                name: &item.source.name,
                status: "processed",
                file_name: &item.file_name,
                error_kind: String::new(),
                error: "",
            })?;
        }
    }

    for failure in &report.pipeline.failures {
        wtr.serialize(SummaryRow {
            id: &failure.item.id,
            name: &failure.item.name,
            status: "failed",
            file_name: "",
            error_kind: failure.error.kind.to_string(),
            error: &failure.error.message,
        })?;
    }

    for item in &report.pipeline.cancelled {
        wtr.serialize(SummaryRow {
            id: &item.id,
            name: &item.name,
            status: "cancelled",
            file_name: "",
            error_kind: String::new(),
            error: "",
        })?;
    }

    wtr.flush()?;
    Ok(())
}
