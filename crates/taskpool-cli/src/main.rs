use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use eyre::{Result, WrapErr};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use taskpool_core::{Concurrency, PoolConfig, TaskPhase, TaskPool, TaskStatus, Work};

/// Run simulated timer tasks through a bounded-concurrency pool and watch them settle.
#[derive(Debug, Parser)]
#[command(name = "taskpool", version)]
struct Cli {
    /// YAML file with `concurrency` and `default_retries`
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Max tasks running at once (a positive number or "unbounded")
    #[arg(short = 'j', long)]
    concurrency: Option<Concurrency>,

    /// Number of tasks to submit
    #[arg(short = 'n', long, default_value_t = 20)]
    tasks: usize,

    /// Retries per task (defaults to the config value)
    #[arg(short, long)]
    retries: Option<u32>,

    /// Upper bound for each simulated task's duration
    #[arg(long, default_value_t = 2000)]
    max_delay_ms: u64,

    /// Chance that a single attempt fails, 0.0..=1.0
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// Print the final status records as JSON
    #[arg(long)]
    json: bool,
}

/// Sleeps for a fixed time, then fails with probability `failure_rate`.
struct SimulatedTimer {
    delay: Duration,
    failure_rate: f64,
}

#[async_trait]
impl Work<u64, String> for SimulatedTimer {
    async fn run(&self) -> Result<u64, String> {
        tokio::time::sleep(self.delay).await;
        let roll: f64 = rand::random();
        if roll < self.failure_rate {
            return Err(format!("simulated failure (roll={roll:.2})"));
        }
        Ok(self.delay.as_millis() as u64)
    }
}

fn load_config(cli: &Cli) -> Result<PoolConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&raw).wrap_err_with(|| format!("parsing {}", path.display()))?
        }
        None => PoolConfig::default(),
    };
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(retries) = cli.retries {
        config.default_retries = retries;
    }
    Ok(config)
}

fn glyph<T, E>(status: &TaskStatus<T, E>) -> char {
    match status.phase() {
        TaskPhase::Queued => '.',
        TaskPhase::Running => '*',
        TaskPhase::Succeeded => '#',
        TaskPhase::Failed => 'x',
        TaskPhase::Abandoned => '!',
    }
}

fn render<T, E>(tasks: &[TaskStatus<T, E>]) -> String {
    tasks.iter().map(glyph).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if !(0.0..=1.0).contains(&cli.failure_rate) {
        eyre::bail!("--failure-rate must be within 0.0..=1.0, got {}", cli.failure_rate);
    }
    let config = load_config(&cli)?;
    info!(concurrency = %config.concurrency, retries = config.default_retries, tasks = cli.tasks, "starting");

    let pool: TaskPool<u64, String> = TaskPool::new(config).wrap_err("building task pool")?;
    let mut watcher = pool.subscribe();

    let max_delay = cli.max_delay_ms.max(1);
    let handles: Vec<_> = (0..cli.tasks)
        .map(|_| {
            let timer = SimulatedTimer {
                delay: Duration::from_millis(rand::random::<u64>() % max_delay),
                failure_rate: cli.failure_rate,
            };
            pool.add(timer, Default::default())
        })
        .collect();
    debug!(submitted = handles.len(), "all tasks submitted");

    println!("{}", render(&watcher.snapshot()));
    while !pool.counts().is_idle() && watcher.changed().await {
        println!("{}", render(&watcher.snapshot()));
    }

    let mut failed = 0usize;
    for handle in handles {
        let id = handle.id();
        if let Err(e) = handle.await {
            failed += 1;
            match e.into_failure() {
                Some(error) => debug!(task_id = %id, %error, "task failed"),
                None => warn!(task_id = %id, "task abandoned"),
            }
        }
    }

    let counts = pool.counts();
    info!(
        succeeded = counts.succeeded,
        failed = counts.failed,
        abandoned = counts.abandoned,
        peak_active = pool.peak_active(),
        "done"
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&pool.tasks())?);
    }
    if failed > 0 {
        eyre::bail!("{failed} of {} tasks failed", cli.tasks);
    }
    Ok(())
}
