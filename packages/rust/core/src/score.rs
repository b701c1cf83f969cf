//! Relevance score normalization.

use serde_json::Value;

/// Upper bound of the relevance scale.
pub const MAX_SCORE: u8 = 100;

/// Why a raw score could not be used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreIssue {
    /// No score in the reply.
    Missing,
    /// Present, but not convertible to an integer.
    NotNumeric,
    /// An integer outside `[0, 100]`; it was clamped.
    OutOfRange,
}

/// Result of [`normalize`]: always a usable value, plus what was wrong with
/// the input, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedScore {
    pub value: u8,
    pub issue: Option<ScoreIssue>,
}

impl NormalizedScore {
    /// True when the caller should log a warning. Clamping is not a warning.
    pub fn is_warning(&self) -> bool {
        matches!(
            self.issue,
            Some(ScoreIssue::Missing | ScoreIssue::NotNumeric)
        )
    }
}

/// Convert a raw score into an integer in `[0, 100]`.
///
/// Integers are clamped, finite floats are truncated toward zero first, and
/// strings must hold an integer (surrounding whitespace allowed). Booleans
/// read as 1 and 0. Everything else yields 0 with an issue attached. Never
/// fails.
pub fn normalize(raw: Option<&Value>) -> NormalizedScore {
    let Some(raw) = raw else {
        return invalid(ScoreIssue::Missing);
    };

    let integer = match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc().clamp(i64::MIN as f64, i64::MAX as f64) as i64)
            }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Null => return invalid(ScoreIssue::Missing),
        _ => None,
    };

    match integer {
        Some(v) => clamp(v),
        None => invalid(ScoreIssue::NotNumeric),
    }
}

fn clamp(v: i64) -> NormalizedScore {
    let value = v.clamp(0, i64::from(MAX_SCORE)) as u8;
    NormalizedScore {
        value,
        issue: (i64::from(value) != v).then_some(ScoreIssue::OutOfRange),
    }
}

fn invalid(issue: ScoreIssue) -> NormalizedScore {
    NormalizedScore {
        value: 0,
        issue: Some(issue),
    }
}
