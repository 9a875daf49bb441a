//! Drop episodes with corrupted clips and renumber the rest into a new dataset

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use episode_db::config::{DatasetConfig, FrameCountPolicy};
use episode_db::curation::{CurationReport, EpisodeCurator};
use episode_db::logging;
use episode_db::oracle::Mp4BoxProbe;
use episode_db::storage::ChunkedEpisodeStore;

/// Copy every episode whose clips all pass the container probe into OUTPUT
#[derive(Parser, Debug)]
#[command(name = "curate_dataset", version, about)]
struct Opt {
    /// Dataset repository id (e.g. `lab/pick-place`)
    #[arg(long, required_unless_present = "root")]
    repo_id: Option<String>,
    /// Source dataset root; defaults to the cache home joined with the repo id
    #[arg(long)]
    root: Option<PathBuf>,
    /// Root of the curated dataset (must not exist or be empty)
    #[arg(long)]
    output: PathBuf,
    /// Episodes to consider, `0..N`; defaults to `info.json`
    #[arg(long)]
    total_episodes: Option<u64>,
    /// Only migrate these cameras (repeatable); defaults to all found
    #[arg(long = "camera")]
    cameras: Vec<String>,
    /// Episodes per chunk; defaults to `info.json` or 1000
    #[arg(long)]
    chunk_capacity: Option<u64>,
    /// Top-level MP4 boxes inspected per clip
    #[arg(long)]
    probe_budget: Option<usize>,
    /// Leave `total_frames` in `info.json` as it was
    #[arg(long)]
    keep_stale_frame_count: bool,
    /// Copy Parquet files as-is instead of rewriting `episode_index`
    #[arg(long)]
    keep_episode_index_column: bool,
    /// Report the plan without writing anything
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

    let policy = if opt.keep_stale_frame_count {
        FrameCountPolicy::KeepStale
    } else {
        FrameCountPolicy::Recompute
    };
    let mut builder = DatasetConfig::builder()
        .root_opt(opt.root)
        .frame_count_policy(policy)
        .keep_episode_index_column(opt.keep_episode_index_column);
    if let Some(repo_id) = opt.repo_id {
        builder = builder.repo_id(repo_id);
    }
    if let Some(capacity) = opt.chunk_capacity {
        builder = builder.chunk_capacity(capacity);
    }
    if let Some(budget) = opt.probe_budget {
        builder = builder.probe_budget(budget);
    }
    let config = builder.build().context("invalid dataset configuration")?;
    let probe = Mp4BoxProbe::new(config.probe_budget());
    let store = ChunkedEpisodeStore::open(config).context("cannot open source dataset")?;

    let mut curator = EpisodeCurator::new(probe).dry_run(opt.dry_run);
    if let Some(total) = opt.total_episodes {
        curator = curator.total_episodes(total);
    }
    if !opt.cameras.is_empty() {
        curator = curator.cameras(opt.cameras);
    }

    let report = curator
        .curate(&store, &opt.output)
        .with_context(|| format!("curation of {} failed", store.root().display()))?;

    if opt.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(report.is_success())
}

fn print_summary(report: &CurationReport) {
    let prefix = if report.dry_run { "[dry run] " } else { "" };
    println!(
        "{prefix}{} -> {}",
        report.source_root.display(),
        report.target_root.display()
    );
    println!(
        "{prefix}kept {} of {} episodes, dropped {}",
        report.kept_count, report.total_episodes, report.dropped_count
    );
    if !report.corrupted.is_empty() {
        println!("{prefix}corrupted: {:?}", report.corrupted);
    }
    if report.dry_run {
        println!("{prefix}{} file(s) planned", report.planned.len());
    } else {
        println!(
            "{prefix}{} file(s) migrated, {} metadata log(s) rebuilt",
            report.files_migrated, report.logs_rewritten
        );
    }
    if let Some(frames) = report.total_frames {
        println!("{prefix}total_frames = {frames}");
    }
    for issue in report.unmigrated().chain(&report.inconsistencies) {
        let episode = issue.episode.map_or_else(|| "-".to_string(), |e| e.to_string());
        println!(
            "{prefix}{:?} episode {episode} {}: {} ({})",
            issue.kind,
            issue.artifact,
            issue.path.display(),
            issue.detail
        );
    }
}
