//! Evaluator output grammar.
//!
//! One line of the form `[v0, v1, ..., vN-1]`, surrounding whitespace
//! allowed, each value a decimal float literal.

use serde::Serialize;

use crate::error::ParseError;

/// One trial's measurement vector. Its length always equals the arity it was
/// parsed or built against.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Sample(Vec<f64>);

impl Sample {
    pub fn new(values: Vec<f64>, arity: usize) -> Result<Self, ParseError> {
        if values.len() != arity {
            return Err(ParseError::ArityMismatch {
                expected: arity,
                found: values.len(),
            });
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn into_values(self) -> Vec<f64> {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutputParser {
    arity: usize,
    allow_non_finite: bool,
}

impl OutputParser {
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            allow_non_finite: false,
        }
    }

    pub fn allow_non_finite(mut self, allow: bool) -> Self {
        self.allow_non_finite = allow;
        self
    }

    pub fn parse(&self, text: &str) -> Result<Sample, ParseError> {
        let line = single_line(text)?;
        let inner = line
            .strip_prefix('[')
            .ok_or(ParseError::MissingOpenBracket)?
            .strip_suffix(']')
            .ok_or(ParseError::MissingCloseBracket)?;

        if inner.trim().is_empty() {
            return Err(ParseError::ArityMismatch {
                expected: self.arity,
                found: 0,
            });
        }

        let tokens: Vec<&str> = inner.split(',').map(str::trim).collect();
        if tokens.len() != self.arity {
            return Err(ParseError::ArityMismatch {
                expected: self.arity,
                found: tokens.len(),
            });
        }

        let mut values = Vec::with_capacity(self.arity);
        for (position, token) in tokens.into_iter().enumerate() {
            values.push(self.parse_token(position, token)?);
        }
        Ok(Sample(values))
    }

    fn parse_token(&self, position: usize, token: &str) -> Result<f64, ParseError> {
        if token.is_empty() {
            return Err(ParseError::EmptyToken { position });
        }
        let value = token
            .parse::<f64>()
            .map_err(|_| ParseError::InvalidToken {
                position,
                token: token.to_string(),
            })?;
        if !value.is_finite() && !self.allow_non_finite {
            return Err(ParseError::NonFinite {
                position,
                token: token.to_string(),
            });
        }
        Ok(value)
    }
}

fn single_line(text: &str) -> Result<&str, ParseError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.next().ok_or(ParseError::Empty)?;
    let rest = lines.count();
    if rest > 0 {
        return Err(ParseError::MultipleLines { lines: rest + 1 });
    }
    Ok(first)
}

/// Renders values in the evaluator's own `[v0, v1, ...]` form.
pub fn render_sample(values: &[f64]) -> String {
    let parts = values
        .iter()
        .map(|v| format!("{:?}", v))
        .collect::<Vec<_>>();
    format!("[{}]", parts.join(", "))
}
