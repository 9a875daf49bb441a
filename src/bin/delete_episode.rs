//! Delete one episode from a dataset in place
//!
//! Other episodes keep their indices.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use episode_db::config::DatasetConfig;
use episode_db::curation::{delete_episode, DeletionReport};
use episode_db::logging;
use episode_db::storage::ChunkedEpisodeStore;

/// Remove an episode's data file, clips and metadata log records
#[derive(Parser, Debug)]
#[command(name = "delete_episode", version, about)]
struct Opt {
    /// Dataset repository id (e.g. `lab/pick-place`)
    #[arg(long, required_unless_present = "root")]
    repo_id: Option<String>,
    /// Dataset root; defaults to the cache home joined with the repo id
    #[arg(long)]
    root: Option<PathBuf>,
    /// Episode to delete
    #[arg(long)]
    episode_index: u64,
    /// Report what would be deleted without touching the dataset
    #[arg(long)]
    dry_run: bool,
    /// Print the full report as JSON on stdout
    #[arg(long)]
    json: bool,
    /// Log progress at info level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool> {
    let opt = Opt::parse();
    logging::init(opt.verbose);

    let mut builder = DatasetConfig::builder().root_opt(opt.root);
    if let Some(repo_id) = opt.repo_id {
        builder = builder.repo_id(repo_id);
    }
    let config = builder.build().context("invalid dataset location")?;
    let store = ChunkedEpisodeStore::open(config).context("cannot open dataset")?;

    let report = delete_episode(&store, opt.episode_index, opt.dry_run)
        .with_context(|| format!("failed to delete episode {}", opt.episode_index))?;

    if opt.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(report.is_success())
}

fn print_summary(report: &DeletionReport) {
    let verb = if report.dry_run { "would delete" } else { "deleted" };
    if report.found.is_empty() {
        println!("episode {}: no files found under {}", report.episode, report.root.display());
        return;
    }
    let files = if report.dry_run { &report.found } else { &report.deleted };
    println!("episode {}: {verb} {} file(s)", report.episode, files.len());
    for path in files {
        println!("  {}", path.display());
    }
    for log in &report.logs_updated {
        println!("  record in {}", log.display());
    }
    for issue in report.missing.iter().chain(&report.failures) {
        println!("  {:?} {}: {} ({})", issue.kind, issue.artifact, issue.path.display(), issue.detail);
    }
}
