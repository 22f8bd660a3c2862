use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A sample whose length disagrees with the aggregator's established arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dimension mismatch: aggregator arity is {expected}, sample has {actual} values")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("output is empty")]
    Empty,
    #[error("expected a single line of output, got {lines}")]
    MultipleLines { lines: usize },
    #[error("missing opening '['")]
    MissingOpenBracket,
    #[error("missing closing ']'")]
    MissingCloseBracket,
    #[error("empty token at position {position}")]
    EmptyToken { position: usize },
    #[error("token {position} is not a number: {token:?}")]
    InvalidToken { position: usize, token: String },
    #[error("token {position} is not finite: {token:?}")]
    NonFinite { position: usize, token: String },
    #[error("expected {expected} values, found {found}")]
    ArityMismatch { expected: usize, found: usize },
}

/// Failure of a single trial.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("failed to launch evaluator {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("evaluator exited abnormally (status {status}){}", tail_suffix(.stderr_tail))]
    AbnormalExit {
        status: String,
        stderr_tail: Option<String>,
    },
    #[error("evaluator timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("failed to capture evaluator output: {0}")]
    Capture(#[source] io::Error),
    #[error("malformed evaluator output ({source}): {raw:?}")]
    MalformedOutput {
        raw: String,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
}

impl TrialError {
    /// Internal contract violations, as opposed to evaluator or environment failures.
    pub fn is_fatal_defect(&self) -> bool {
        matches!(self, TrialError::DimensionMismatch(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            TrialError::Launch { .. } => "launch_error",
            TrialError::AbnormalExit { .. } => "abnormal_exit",
            TrialError::Timeout { .. } => "timeout",
            TrialError::Capture(_) => "capture_error",
            TrialError::MalformedOutput { .. } => "malformed_output",
            TrialError::DimensionMismatch(_) => "dimension_mismatch",
        }
    }
}

fn tail_suffix(tail: &Option<String>) -> String {
    match tail {
        Some(line) => format!(": {}", line),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("trial {index} failed: {source}")]
    Trial {
        index: usize,
        #[source]
        source: TrialError,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl HarnessError {
    pub fn code(&self) -> &'static str {
        match self {
            HarnessError::Trial { source, .. } => source.code(),
            HarnessError::Config(_)
            | HarnessError::ConfigRead { .. }
            | HarnessError::ConfigParse { .. } => "config_error",
        }
    }

    pub fn trial_index(&self) -> Option<usize> {
        match self {
            HarnessError::Trial { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_error_message_names_the_trial() {
        let err = HarnessError::Trial {
            index: 7,
            source: TrialError::MalformedOutput {
                raw: "oops".to_string(),
                source: ParseError::MissingOpenBracket,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("trial 7"), "unexpected message: {}", msg);
        assert_eq!(err.code(), "malformed_output");
        assert_eq!(err.trial_index(), Some(7));
    }

    #[test]
    fn abnormal_exit_includes_stderr_tail() {
        let err = TrialError::AbnormalExit {
            status: "3".to_string(),
            stderr_tail: Some("panicked at main.rs".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "evaluator exited abnormally (status 3): panicked at main.rs"
        );
        assert!(!err.is_fatal_defect());
    }

    #[test]
    fn dimension_mismatch_is_a_defect() {
        let err = TrialError::from(DimensionMismatch {
            expected: 9,
            actual: 8,
        });
        assert!(err.is_fatal_defect());
        assert_eq!(err.code(), "dimension_mismatch");
    }
}
