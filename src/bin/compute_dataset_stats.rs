//! Aggregate per-episode statistics into a normalization table

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use episode_db::config::DatasetConfig;
use episode_db::logging;
use episode_db::stats::{load_episode_stats, StatsAggregator};
use episode_db::storage::ChunkedEpisodeStore;

/// Merge `meta/episodes_stats.jsonl` into dataset-level mean/std/min/max/count
#[derive(Parser, Debug)]
#[command(name = "compute_dataset_stats", version, about)]
struct Opt {
    /// Dataset repository id (e.g. `lab/pick-place`)
    #[arg(long, required_unless_present = "root")]
    repo_id: Option<String>,
    /// Dataset root; defaults to the cache home joined with the repo id
    #[arg(long)]
    root: Option<PathBuf>,
    /// Normalization table to write (JSON)
    #[arg(long)]
    output: PathBuf,
    /// Feature-name prefix of image features, which are skipped
    #[arg(long)]
    image_prefix: Option<String>,
    /// Fail if any feature could not be aggregated
    #[arg(long)]
    strict: bool,
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
    if let Some(prefix) = opt.image_prefix {
        builder = builder.image_feature_prefix(prefix);
    }
    let config = builder.build().context("invalid dataset location")?;
    let store = ChunkedEpisodeStore::open(config).context("cannot open dataset")?;

    let log_path = store.episodes_stats_log();
    let log = load_episode_stats(&log_path)
        .with_context(|| format!("cannot read {}", log_path.display()))?;
    if !log.skipped.is_empty() {
        eprintln!("skipped {} stats line(s) or feature(s)", log.skipped.len());
    }

    let aggregation = StatsAggregator::from_config(store.config())
        .aggregate(&log.stats)
        .context("aggregation failed")?;
    for failure in &aggregation.failures {
        eprintln!("feature {}: {}", failure.feature, failure.error);
    }

    aggregation
        .table
        .write_json(&opt.output)
        .with_context(|| format!("cannot write {}", opt.output.display()))?;
    println!(
        "{} episode(s), {} feature(s) written to {}",
        log.stats.len(),
        aggregation.table.len(),
        opt.output.display()
    );
    for (feature, stat) in aggregation.table.iter() {
        println!("  {feature}: mean {:?} std {:?}", stat.mean.data(), stat.std.data());
    }

    Ok(!opt.strict || aggregation.is_complete())
}
