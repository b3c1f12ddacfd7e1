//! Repeated runs against a gold answer, judged by the evaluate role.

use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use lemmaloop_providers::Gateway;
use lemmaloop_types::{FinalReport, Lemma, Role};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::call::call_with_retry;
use crate::controller::{EngineSettings, RoundController};
use crate::parser::{EvaluateParser, Evaluation, RoleParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Correct,
    Incorrect,
    /// The run aborted or ended without a verified final lemma.
    NoSolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: u32,
    pub elapsed_sec: f64,
    /// Statement of the verified final lemma.
    pub answer: Option<String>,
    pub decision: Decision,
    pub correct: bool,
    /// Evaluator reply, or the error that prevented a verdict.
    pub evaluator_raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub runs: u32,
    pub correct: u32,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub summary: BenchmarkSummary,
    pub results: Vec<RunRecord>,
}

#[derive(Debug, Clone)]
pub struct BenchmarkOptions {
    pub runs: u32,
    /// Runs allowed in flight at once.
    pub concurrency: usize,
    pub initial_memory: Vec<Lemma>,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            runs: 10,
            concurrency: 1,
            initial_memory: Vec::new(),
        }
    }
}

pub async fn run_benchmark<G: Gateway>(
    gateway: &G,
    settings: &EngineSettings,
    problem: &str,
    gold: &str,
    options: &BenchmarkOptions,
) -> anyhow::Result<BenchmarkReport> {
    anyhow::ensure!(options.runs > 0, "benchmark needs at least one run");
    let permits = options
        .concurrency
        .clamp(1, options.runs as usize)
        .min(Semaphore::MAX_PERMITS);
    let semaphore = Semaphore::new(permits);

    let runs = (1..=options.runs).map(|run| {
        let semaphore = &semaphore;
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .context("benchmark semaphore closed")?;
            tracing::info!(run, total = options.runs, "Benchmark run started");
            Ok::<_, anyhow::Error>(run_once(gateway, settings, problem, gold, options, run).await)
        }
    });

    let results = join_all(runs)
        .await
        .into_iter()
        .collect::<anyhow::Result<Vec<_>>>()?;

    let correct = results.iter().filter(|r| r.correct).count() as u32;
    let summary = BenchmarkSummary {
        runs: options.runs,
        correct,
        accuracy: f64::from(correct) / f64::from(options.runs),
        timestamp: Utc::now(),
    };
    tracing::info!(
        runs = summary.runs,
        correct = summary.correct,
        accuracy = summary.accuracy,
        "Benchmark finished"
    );
    Ok(BenchmarkReport { summary, results })
}

async fn run_once<G: Gateway>(
    gateway: &G,
    settings: &EngineSettings,
    problem: &str,
    gold: &str,
    options: &BenchmarkOptions,
    run: u32,
) -> RunRecord {
    let started = Instant::now();
    let outcome = RoundController::new(gateway, settings)
        .run(problem, options.initial_memory.clone())
        .await;

    let (answer, decision, evaluator_raw) = match outcome {
        Ok(report) if report.is_solved() => {
            let (decision, raw) = evaluate(gateway, settings, problem, gold, &report).await;
            (report.answer().map(str::to_string), decision, raw)
        }
        Ok(report) => (
            None,
            Decision::NoSolution,
            format!("run ended {}", report.termination.as_str()),
        ),
        Err(err) => {
            tracing::warn!(run, error = %err, "Benchmark run aborted");
            (None, Decision::NoSolution, err.to_string())
        }
    };

    RunRecord {
        run,
        elapsed_sec: started.elapsed().as_secs_f64(),
        answer,
        correct: decision == Decision::Correct,
        decision,
        evaluator_raw,
    }
}

/// Judge a solved report. A failed or unparsable evaluation counts as
/// incorrect.
async fn evaluate<G: Gateway>(
    gateway: &G,
    settings: &EngineSettings,
    problem: &str,
    gold: &str,
    report: &FinalReport,
) -> (Decision, String) {
    let input = settings
        .templates
        .render_evaluate(problem, gold, &report.render_text());
    match call_with_retry(gateway, &settings.call_policy(), Role::Evaluate, &input).await {
        Ok(raw) => match EvaluateParser.parse(&raw) {
            Ok(Evaluation::Correct) => (Decision::Correct, raw),
            Ok(Evaluation::Incorrect) => (Decision::Incorrect, raw),
            Err(err) => {
                tracing::warn!(error = %err, "Evaluator reply has no verdict");
                (Decision::Incorrect, raw)
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "Evaluation failed");
            (Decision::Incorrect, err.to_string())
        }
    }
}
