use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};
use tracing_subscriber::EnvFilter;

use taskscore::class_scoring::{ClassHandle, spawn_class};
use taskscore::collector::{ScoreCollector, run_collector};
use taskscore::config::ScoringConfig;
use taskscore::fix::{PositionFix, group_by_competitor, load_fixes};
use taskscore::in_order::Mode;
use taskscore::log_format::TargetFirstFormat;
use taskscore::pilot_cache::{PilotCache, PilotRoster};
use taskscore::pipeline::{CompetitorPipeline, PipelineOptions};
use taskscore::task::{Task, TaskDefinition};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(
    name = "taskscore",
    version = option_env!("VERGEN_GIT_DESCRIBE").unwrap_or(env!("CARGO_PKG_VERSION")),
    about = "Live task scoring for glider competitions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score a recorded JSON-lines fix file and print each competitor's final score
    Replay {
        #[arg(long)]
        task: PathBuf,
        #[arg(long)]
        fixes: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Score JSON-lines fixes from stdin, printing a batch of scores every interval
    Live {
        #[arg(long)]
        task: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// TOML pilot list with `[[pilot]]` entries
    #[arg(long)]
    pilots: Option<PathBuf>,
    /// TOML scoring configuration
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "default")]
    class: String,
}

impl CommonArgs {
    fn config(&self) -> Result<ScoringConfig> {
        ScoringConfig::load_or_default(self.config.as_deref())
    }

    fn pilots(&self, config: &ScoringConfig) -> Result<Arc<PilotCache>> {
        let roster = match &self.pilots {
            Some(path) => PilotRoster::load(path)?,
            None => PilotRoster::default(),
        };
        info!(pilots = roster.len(), "Loaded pilot roster");
        Ok(Arc::new(PilotCache::new(
            Box::new(roster),
            config.pilot_cache_ttl(),
            config.pilot_cache_capacity,
        )))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(TargetFirstFormat::new(std::io::stderr().is_terminal()))
        .init();
}

fn load_task(path: &Path) -> Result<Task> {
    let definition = TaskDefinition::load(path)?;
    let task = Task::prepare(&definition).with_context(|| format!("Invalid task in {:?}", path))?;
    for leg in task.degraded_legs() {
        warn!(leg, "Leg direction unresolved, scoring may be off");
    }
    Ok(task)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Replay { task, fixes, common } => replay(&task, &fixes, &common),
        Commands::Live { task, common } => live(&task, &common).await,
    }
}

fn replay(task_path: &Path, fixes_path: &Path, common: &CommonArgs) -> Result<()> {
    let config = common.config()?;
    let pilots = common.pilots(&config)?;
    let task = Arc::new(load_task(task_path)?);
    let fixes = load_fixes(fixes_path)?;
    info!(fixes = fixes.len(), "Replaying fixes");

    for (competitor, history) in group_by_competitor(fixes) {
        let options = PipelineOptions {
            delay_secs: config.in_order_delay_secs,
            mode: Mode::Replay,
            start_override: None,
            history,
        };
        let mut pipeline =
            CompetitorPipeline::new(task.clone(), pilots.pilot(&common.class, &competitor), options);
        match pipeline.replay() {
            Ok(Some(score)) => println!("{}", serde_json::to_string(&score)?),
            Ok(None) => info!(competitor = %competitor, "No score produced"),
            Err(e) => error!(competitor = %competitor, error = %e, "Replay failed"),
        }
    }
    Ok(())
}

async fn live(task_path: &Path, common: &CommonArgs) -> Result<()> {
    let config = common.config()?;
    let pilots = common.pilots(&config)?;
    let task = load_task(task_path)?;
    let class = common.class.clone();

    let (collector_tx, collector_rx) = flume::bounded(config.fix_queue_size.max(1));
    let (batch_tx, batch_rx) = flume::bounded(16);
    // the collector flushes and stops on its own once the class loop is gone
    let collector = tokio::spawn(
        run_collector(
            ScoreCollector::new(&class),
            collector_rx,
            batch_tx,
            config.collector_interval(),
            CancellationToken::new(),
        )
        .instrument(tracing::info_span!("collector", class = %class)),
    );
    let printer = tokio::spawn(async move {
        while let Ok(batch) = batch_rx.recv_async().await {
            match serde_json::to_string(&batch) {
                Ok(line) => println!("{line}"),
                Err(e) => error!(error = %e, "Failed to serialize batch"),
            }
        }
    });

    let (handle, class_loop) = spawn_class(&class, config, pilots, collector_tx, CancellationToken::new());
    handle.set_task(task).await?;

    tokio::select! {
        result = read_stdin(&handle) => {
            result?;
            info!("Input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Class already stopped");
    }
    class_loop.await.context("Class loop panicked")?;
    collector.await.context("Collector panicked")?;
    printer.await.context("Printer panicked")?;
    Ok(())
}

async fn read_stdin(handle: &ClassHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PositionFix>(&line) {
            Ok(fix) => handle.push_fix(fix).await?,
            Err(e) => warn!(error = %e, "Skipping unparseable fix"),
        }
    }
    Ok(())
}
