//! lemmaloop CLI - binary entry point.
//!
//! ```text
//! main() -> load config -> ChatGateway + EngineSettings
//!              |
//!              +-- run:   RoundController::run()  -> FinalReport JSON
//!              +-- bench: run_benchmark()         -> BenchmarkReport JSON
//! ```
//!
//! Reports go to stdout or `--out`; logs go to `~/.lemmaloop/logs/lemmaloop.log`.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lemmaloop_engine::benchmark::BenchmarkOptions;
use lemmaloop_engine::config::config_path;
use lemmaloop_engine::report::report_json;
use lemmaloop_engine::{
    LemmaloopConfig, RoundController, load_memory, run_benchmark, write_report,
};

#[derive(Parser)]
#[command(name = "lemmaloop")]
#[command(about = "Propose, verify and refine lemmas until a problem is solved")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.lemmaloop/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the loop once and print the final report
    Run {
        /// File containing the problem statement
        problem: PathBuf,

        /// Extra guidance appended to every propose input (overrides config)
        #[arg(long)]
        hint: Option<String>,

        /// Previous report whose lemmas seed the memory
        #[arg(long)]
        memory: Option<PathBuf>,

        /// Write the report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Also print the certificate as text to stderr
        #[arg(long, default_value_t = false)]
        text: bool,
    },
    /// Run the loop repeatedly and judge each answer against a gold answer
    Bench {
        /// File containing the problem statement
        problem: PathBuf,

        /// File containing the gold standard answer
        #[arg(long)]
        gold: PathBuf,

        /// Number of runs
        #[arg(long, short = 'n', default_value_t = 10)]
        runs: u32,

        /// Runs in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Previous report whose lemmas seed every run
        #[arg(long)]
        memory: Option<PathBuf>,

        /// Output JSON file (default: benchmark_results_<unix time>.json)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    tokio::select! {
        result = execute(cli) => result,
        _ = signal::ctrl_c() => {
            tracing::warn!("Interrupted");
            anyhow::bail!("interrupted")
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let gateway = config
        .gateway()
        .context("failed to configure the reasoning service")?;
    let mut settings = config.engine_settings()?;

    match cli.command {
        Commands::Run {
            problem,
            hint,
            memory,
            out,
            text,
        } => {
            let problem = read_text(&problem)?;
            if hint.is_some() {
                settings.hint = hint;
            }
            let memory = match memory {
                Some(path) => load_memory(&path)?,
                None => Vec::new(),
            };

            let report = RoundController::new(&gateway, &settings)
                .run(&problem, memory)
                .await?;

            if text {
                eprint!("{}", report.render_text());
            }
            match out {
                Some(path) => {
                    write_report(&report, &path)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("report written to {}", path.display());
                }
                None => io::stdout().write_all(report_json(&report)?.as_bytes())?,
            }
        }
        Commands::Bench {
            problem,
            gold,
            runs,
            concurrency,
            memory,
            out,
        } => {
            let problem = read_text(&problem)?;
            let gold = read_text(&gold)?;
            let options = BenchmarkOptions {
                runs,
                concurrency,
                initial_memory: match memory {
                    Some(path) => load_memory(&path)?,
                    None => Vec::new(),
                },
            };

            let report = run_benchmark(&gateway, &settings, &problem, &gold, &options).await?;

            println!("{}", serde_json::to_string_pretty(&report.summary)?);
            let path = out.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "benchmark_results_{}.json",
                    Utc::now().timestamp()
                ))
            });
            fs::write(&path, serde_json::to_string_pretty(&report)?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("detailed results saved to {}", path.display());
        }
    }
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<LemmaloopConfig> {
    let config = match explicit {
        Some(path) => LemmaloopConfig::load_from(path)?,
        None => LemmaloopConfig::load()?.with_context(|| match config_path() {
            Some(path) => format!("no config found at {}; pass --config", path.display()),
            None => "no home directory; pass --config".to_string(),
        })?,
    };
    tracing::debug!(?config, "Config loaded");
    Ok(config)
}

fn read_text(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let text = text.trim();
    anyhow::ensure!(!text.is_empty(), "{} is empty", path.display());
    Ok(text.to_string())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries the report, so logs fall back to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.lemmaloop/logs/lemmaloop.log
    if let Some(config_path) = config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("lemmaloop.log"));
    }

    // Fallback: ./.lemmaloop/logs/lemmaloop.log
    candidates.push(PathBuf::from(".lemmaloop").join("logs").join("lemmaloop.log"));

    candidates
}
