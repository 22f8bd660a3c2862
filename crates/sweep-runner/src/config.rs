use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Trials per run when nothing else is configured.
pub const DEFAULT_TRIAL_COUNT: usize = 100;
/// Values per evaluator output line when nothing else is configured.
pub const DEFAULT_ARITY: usize = 9;

/// What to do when the evaluator exits non-zero or is killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    /// Abort the whole run at the failing trial.
    #[default]
    Fail,
    /// Log a warning, count it, and still parse the output.
    Warn,
    /// Count it and parse the output.
    Ignore,
}

impl ExitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitPolicy::Fail => "fail",
            ExitPolicy::Warn => "warn",
            ExitPolicy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ExitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    pub evaluator: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_trial_count")]
    pub trial_count: usize,

    #[serde(default = "default_arity")]
    pub arity: usize,

    /// Per-trial limit; unset means wait indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub exit_policy: ExitPolicy,

    #[serde(default)]
    pub allow_non_finite: bool,

    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Keep every parsed sample in the run summary.
    #[serde(default)]
    pub keep_samples: bool,
}

fn default_trial_count() -> usize {
    DEFAULT_TRIAL_COUNT
}

fn default_arity() -> usize {
    DEFAULT_ARITY
}

fn default_jobs() -> usize {
    1
}

impl HarnessConfig {
    pub fn new(evaluator: impl Into<PathBuf>) -> Self {
        Self {
            evaluator: evaluator.into(),
            args: Vec::new(),
            trial_count: DEFAULT_TRIAL_COUNT,
            arity: DEFAULT_ARITY,
            timeout_secs: None,
            exit_policy: ExitPolicy::default(),
            allow_non_finite: false,
            jobs: default_jobs(),
            keep_samples: false,
        }
    }

    /// Loads a YAML (or JSON) config file.
    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let raw = fs::read_to_string(path).map_err(|source| HarnessError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| HarnessError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let mut problems = Vec::new();
        if self.evaluator.as_os_str().is_empty() {
            problems.push("evaluator path is empty");
        }
        if self.trial_count == 0 {
            problems.push("trial_count must be at least 1");
        }
        if self.arity == 0 {
            problems.push("arity must be at least 1");
        }
        if self.jobs == 0 {
            problems.push("jobs must be at least 1");
        }
        if self.timeout_secs == Some(0) {
            problems.push("timeout_secs must be positive when set");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Config(problems.join("; ")))
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
