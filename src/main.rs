//! scatter-gather CLI entry point
//!
//! Launches one root job through an in-process dispatcher and prints the
//! throughput once every item has been gathered.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Level};

use scatter_gather::{open_store, Dispatcher, NoopWork, Requester, ScatterConfig};

/// Recursive scatter-gather over a tree of coordinators
#[derive(Parser, Debug)]
#[command(name = "scatter-gather")]
#[command(version, about, long_about = None)]
struct Cli {
    /// YAML configuration file; flags below override its values
    #[arg(short, long, env = "SCATTER_GATHER_CONFIG")]
    config: Option<PathBuf>,

    /// Number of work items in the run
    #[arg(short = 'n', long)]
    items: Option<u64>,

    /// Jobs larger than this are split into sub-jobs
    #[arg(short = 'm', long)]
    min_partition_size: Option<u64>,

    /// Maximum concurrently executing leaf tasks
    #[arg(short, long)]
    workers: Option<usize>,

    /// Keep coordinator state in a sled database at this path
    #[arg(long)]
    state_db: Option<PathBuf>,

    /// Do not purge persisted coordinator state on startup
    #[arg(long)]
    keep_state: bool,

    /// Give up waiting for the run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn to_config(&self) -> Result<ScatterConfig> {
        let mut config = match &self.config {
            Some(path) => ScatterConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ScatterConfig::default(),
        };

        if let Some(items) = self.items {
            config.total_items = items;
        }
        if let Some(size) = self.min_partition_size {
            config.min_partition_size = size;
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(path) = &self.state_db {
            config.state_db_path = Some(path.clone());
        }
        if self.keep_state {
            config.purge_on_startup = false;
        }

        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = cli.to_config()?;
    let store = open_store(&config).context("Failed to open coordinator state store")?;
    let dispatcher = Dispatcher::start(&config, store, Arc::new(NoopWork))?;

    let handle = Requester::new(&dispatcher).launch(config.total_items).await?;
    let report = match cli.timeout_secs {
        Some(secs) => handle.wait_timeout(Duration::from_secs(secs)).await?,
        None => handle.wait().await?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Done! {} items in {} ms ({:.1} items/s)",
            report.total_items,
            report.elapsed.as_millis(),
            report.items_per_second
        );
    }

    let snapshot = dispatcher.metrics().snapshot();
    debug!(?snapshot, "Dispatch metrics");

    let faults = dispatcher.take_faults();
    dispatcher.shutdown().await?;

    if !faults.is_empty() {
        for fault in &faults {
            eprintln!("fault on {} ({}): {}", fault.job_id, fault.message_kind, fault.error);
        }
        anyhow::bail!("{} coordination faults recorded", faults.len());
    }
    Ok(())
}
