//! Repeated-trial harness for an external evaluator.
//!
//! Each trial launches the evaluator, parses its single `[v0, v1, ...]`
//! output line into a [`Sample`], and folds it into a running per-position
//! minimum and maximum. The final [`AggregateState`] is reported once.

pub mod aggregate;
pub mod config;
pub mod driver;
pub mod error;
pub mod parse;
pub mod process;
pub mod report;

pub use aggregate::{AggregateState, StatAggregator};
pub use config::{ExitPolicy, HarnessConfig, DEFAULT_ARITY, DEFAULT_TRIAL_COUNT};
pub use driver::{run_harness, run_trials, RunSummary, TrialRecord};
pub use error::{DimensionMismatch, HarnessError, ParseError, TrialError};
pub use parse::{render_sample, OutputParser, Sample};
pub use process::{ProcessRunner, RunResult, Runner};
pub use report::{render_text, summary_to_json, write_samples_jsonl};
