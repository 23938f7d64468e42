use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use lanework::config::Config;
use lanework::core::{BatchFile, Params, Priority, Task, TaskKind, TaskStatus};
use lanework::orchestration::{HealthMonitor, MonitorHandle};
use lanework::{lw_info, Error, Result, Scheduler};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// lanework - priority-lane task scheduler with self-repairing retries
#[derive(Parser, Debug)]
#[command(name = "lanework")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    LANEWORK_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.lanework/lanework.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (default: ~/.lanework/lanework.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of worker threads (overrides the config file)
    #[arg(short = 'w', long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a single task and print its final snapshot
    Run {
        /// Task kind, e.g. generate-script or validate-target
        kind: String,

        /// Task params as a JSON object
        #[arg(long)]
        params: Option<String>,

        /// Dispatch priority: critical, high, medium or low
        #[arg(short, long, default_value = "medium")]
        priority: Priority,

        /// Retry ceiling for this task
        #[arg(long)]
        max_retries: Option<u32>,

        /// Seconds to wait for the task to finish
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Submit a batch file (JSON or TOML) and print the batch snapshot
    Batch {
        /// Path to the batch file
        file: PathBuf,

        /// Priority for every task (overrides the file)
        #[arg(short, long)]
        priority: Option<Priority>,

        /// Seconds to wait for the batch to finish
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    lanework::log::init_with_debug(cli.debug);
    lw_info!("lanework starting: {:?}", cli.command);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    let success = match cli.command {
        Command::Run {
            kind,
            params,
            priority,
            max_retries,
            timeout,
        } => run_task(&config, &kind, params.as_deref(), priority, max_retries, timeout)?,
        Command::Batch {
            file,
            priority,
            timeout,
        } => run_batch(&config, &file, priority, timeout)?,
        Command::Config { init } => {
            show_config(&config, cli.config.as_deref(), init)?;
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn parse_params(raw: Option<&str>) -> Result<Params> {
    match raw {
        None => Ok(Params::new()),
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(Error::Validation(format!(
                "--params must be a JSON object, got {}",
                other
            ))),
        },
    }
}

fn load_batch_file(path: &Path) -> Result<BatchFile> {
    let content = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        Ok(toml::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(&content)?)
    }
}

/// Start the scheduler and a health monitor on a dedicated runtime.
fn start(config: &Config) -> Result<(Scheduler, tokio::runtime::Runtime, MonitorHandle)> {
    let scheduler = Scheduler::from_config(config)?;
    scheduler.start()?;

    let rt = tokio::runtime::Runtime::new()?;
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let monitor = {
        let _guard = rt.enter();
        let handle = HealthMonitor::new(scheduler.metrics_source(), report_tx)
            .with_interval(config.monitor_interval())
            .spawn();
        // Reports are already logged by the monitor; keep the channel open.
        tokio::spawn(async move { while report_rx.recv().await.is_some() {} });
        handle
    };

    Ok((scheduler, rt, monitor))
}

fn finish(scheduler: &Scheduler, monitor: MonitorHandle, rt: tokio::runtime::Runtime) -> Result<()> {
    monitor.shutdown();
    let result = scheduler.stop();
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

fn run_task(
    config: &Config,
    kind: &str,
    params: Option<&str>,
    priority: Priority,
    max_retries: Option<u32>,
    timeout: u64,
) -> Result<bool> {
    let params = parse_params(params)?;
    let (scheduler, rt, monitor) = start(config)?;

    let task = Task::new(TaskKind::parse(kind), priority, params)
        .with_max_retries(max_retries.unwrap_or(config.max_retries));
    let id = scheduler.submit_task(task)?;
    lw_info!("run: submitted task {} ({})", id.short(), kind);

    let timeout = Duration::from_secs(timeout);
    let finished = scheduler.wait_for(&[id], timeout);
    let task = scheduler.task(id)?;
    let output = serde_json::json!({
        "task": task,
        "metrics": scheduler.metrics(),
        "repairs": scheduler.repair_history_for(id),
    });
    finish(&scheduler, monitor, rt)?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    if !finished {
        return Err(Error::Timeout(timeout));
    }
    Ok(task.status == TaskStatus::Completed)
}

fn run_batch(config: &Config, file: &Path, priority: Option<Priority>, timeout: u64) -> Result<bool> {
    let batch = load_batch_file(file)?;
    let priority = priority.or(batch.priority).unwrap_or_default();
    let (scheduler, rt, monitor) = start(config)?;

    let job = scheduler.submit_batch(&batch.name, priority, batch.tasks)?;
    let waited = scheduler.wait_for_batch(job, Duration::from_secs(timeout));
    let output = serde_json::json!({
        "batch": scheduler.get_batch(job),
        "metrics": scheduler.metrics(),
        "repairs": scheduler.repair_history(),
    });
    finish(&scheduler, monitor, rt)?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(waited?.status == TaskStatus::Completed)
}

fn show_config(config: &Config, path: Option<&Path>, init: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };

    if init {
        if path.exists() {
            println!("Config already exists: {}", path.display());
        } else {
            config.save_to(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
