use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::aggregate::{AggregateState, StatAggregator};
use crate::config::{ExitPolicy, HarnessConfig};
use crate::error::{HarnessError, TrialError};
use crate::parse::OutputParser;
use crate::process::{ProcessRunner, Runner};

/// Per-trial audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialRecord {
    pub index: usize,
    pub status: String,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    pub elapsed: Duration,
    pub evaluator: PathBuf,
    pub trial_count: usize,
    pub arity: usize,
    pub abnormal_exits: usize,
    pub state: AggregateState,
    pub trials: Vec<TrialRecord>,
}

struct TrialOutcome {
    record: TrialRecord,
    abnormal: bool,
}

/// Runs every configured trial against the real evaluator.
pub fn run_harness(config: &HarnessConfig) -> Result<RunSummary, HarnessError> {
    let runner = ProcessRunner::from_config(config);
    run_trials(&runner, config)
}

pub fn run_trials<R: Runner>(runner: &R, config: &HarnessConfig) -> Result<RunSummary, HarnessError> {
    config.validate()?;
    let parser = OutputParser::new(config.arity).allow_non_finite(config.allow_non_finite);
    let started_at = Utc::now();
    let started = Instant::now();
    info!(
        evaluator = %config.evaluator.display(),
        trials = config.trial_count,
        arity = config.arity,
        jobs = config.jobs,
        exit_policy = %config.exit_policy,
        "starting run"
    );

    let (aggregator, mut outcomes) = if config.jobs == 1 {
        run_sequential(runner, &parser, config)?
    } else {
        run_parallel(runner, &parser, config)?
    };
    outcomes.sort_by_key(|o| o.record.index);

    let state = aggregator.finalize().ok_or_else(|| {
        HarnessError::Config("run finished without any samples".to_string())
    })?;
    let abnormal_exits = outcomes.iter().filter(|o| o.abnormal).count();
    let elapsed = started.elapsed();
    info!(
        trials = aggregator.count(),
        abnormal_exits,
        elapsed_ms = elapsed.as_millis() as u64,
        "run finished"
    );

    Ok(RunSummary {
        started_at,
        elapsed,
        evaluator: config.evaluator.clone(),
        trial_count: config.trial_count,
        arity: config.arity,
        abnormal_exits,
        state,
        trials: outcomes.into_iter().map(|o| o.record).collect(),
    })
}

fn run_sequential<R: Runner>(
    runner: &R,
    parser: &OutputParser,
    config: &HarnessConfig,
) -> Result<(StatAggregator, Vec<TrialOutcome>), HarnessError> {
    let mut aggregator = StatAggregator::new(config.arity);
    let mut outcomes = Vec::with_capacity(config.trial_count);
    for index in 1..=config.trial_count {
        let outcome = run_trial(runner, parser, config, &mut aggregator, index).map_err(|source| {
            log_trial_failure(index, &source);
            HarnessError::Trial { index, source }
        })?;
        outcomes.push(outcome);
    }
    Ok((aggregator, outcomes))
}

fn run_parallel<R: Runner>(
    runner: &R,
    parser: &OutputParser,
    config: &HarnessConfig,
) -> Result<(StatAggregator, Vec<TrialOutcome>), HarnessError> {
    let next = AtomicUsize::new(1);
    let stop = AtomicBool::new(false);
    let failure: Mutex<Option<(usize, TrialError)>> = Mutex::new(None);
    let workers = config.jobs.min(config.trial_count);

    let partials = thread::scope(|scope| {
        let (next, stop, failure) = (&next, &stop, &failure);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(scope.spawn(move || {
                let mut local = StatAggregator::new(config.arity);
                let mut outcomes = Vec::new();
                while !stop.load(Ordering::SeqCst) {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index > config.trial_count {
                        break;
                    }
                    match run_trial(runner, parser, config, &mut local, index) {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(err) => {
                            stop.store(true, Ordering::SeqCst);
                            record_failure(failure, index, err);
                            break;
                        }
                    }
                }
                (local, outcomes)
            }));
        }
        handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
    });

    let failure = failure
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some((index, source)) = failure {
        return Err(HarnessError::Trial { index, source });
    }

    let mut aggregator = StatAggregator::new(config.arity);
    let mut outcomes = Vec::with_capacity(config.trial_count);
    for joined in partials {
        let (local, mut local_outcomes) = match joined {
            Ok(parts) => parts,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        // Every partial is built with `config.arity`, so a mismatch here is a harness bug.
        aggregator.merge(local).map_err(|mismatch| {
            error!(%mismatch, "partial aggregates disagree on arity");
            HarnessError::Config(format!("partial aggregates disagree: {}", mismatch))
        })?;
        outcomes.append(&mut local_outcomes);
    }
    Ok((aggregator, outcomes))
}

fn log_trial_failure(index: usize, err: &TrialError) {
    if err.is_fatal_defect() {
        error!(trial = index, code = err.code(), error = %err, "harness defect");
    } else {
        warn!(trial = index, code = err.code(), error = %err, "trial failed");
    }
}

/// Keeps the lowest failing trial index so the report is stable across schedules.
fn record_failure(slot: &Mutex<Option<(usize, TrialError)>>, index: usize, err: TrialError) {
    log_trial_failure(index, &err);
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let replace = match guard.as_ref() {
        Some((existing, _)) => index < *existing,
        None => true,
    };
    if replace {
        *guard = Some((index, err));
    }
}

fn run_trial<R: Runner>(
    runner: &R,
    parser: &OutputParser,
    config: &HarnessConfig,
    aggregator: &mut StatAggregator,
    index: usize,
) -> Result<TrialOutcome, TrialError> {
    let result = runner.run(index)?;
    let abnormal = !result.success();
    if abnormal {
        let status = result.status_label();
        match config.exit_policy {
            ExitPolicy::Fail => {
                return Err(TrialError::AbnormalExit {
                    status,
                    stderr_tail: result.stderr_tail().map(str::to_string),
                });
            }
            ExitPolicy::Warn => warn!(
                trial = index,
                status = %status,
                stderr = result.stderr_tail().unwrap_or(""),
                "evaluator exited abnormally, parsing output anyway"
            ),
            ExitPolicy::Ignore => debug!(trial = index, status = %status, "abnormal exit ignored"),
        }
    }

    let sample = parser
        .parse(&result.stdout)
        .map_err(|source| TrialError::MalformedOutput {
            raw: result.stdout.clone(),
            source,
        })?;
    aggregator.update(&sample)?;
    debug!(
        trial = index,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "trial folded"
    );

    Ok(TrialOutcome {
        record: TrialRecord {
            index,
            status: result.status_label(),
            elapsed_ms: result.elapsed.as_millis() as u64,
            sample: config.keep_samples.then(|| sample.into_values()),
        },
        abnormal,
    })
}
