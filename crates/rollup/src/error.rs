use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors. Only these abort a run; row-level problems are [`RowError`] values.
#[derive(Debug, Error)]
pub enum RollupError {
    /// TOML / CSV parse error in a configuration document.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Config validation error (bad delimiter, missing identifier column, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),

    /// Two units resolve to the same organization path.
    #[error("duplicate organization unit '{path}'")]
    DuplicateUnit { path: String },

    /// A unit names a parent that is not defined.
    #[error("unit '{unit}': unknown parent '{parent}'")]
    UnknownParent { unit: String, parent: String },

    /// The unit graph contains a cycle.
    #[error("cycle in organization hierarchy: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    /// A membership rule is empty or does not compile.
    #[error("unit '{unit}': invalid membership rule '{rule}': {message}")]
    InvalidRule {
        unit: String,
        rule: String,
        message: String,
    },

    /// A required column is absent from an export's header row.
    #[error("{input}: missing column '{column}'")]
    MissingColumn { input: String, column: String },

    /// The header row itself could not be read.
    #[error("{input}: cannot read header row: {message}")]
    Header { input: String, message: String },

    #[error("I/O error: {source} (input: {input})")]
    Io {
        input: String,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    /// A fold was attempted after the report was finalized.
    #[error("rollup already finalized")]
    Finalized,
}

impl RollupError {
    /// True for errors caused by the hierarchy or run configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse(_)
                | Self::ConfigValidation(_)
                | Self::DuplicateUnit { .. }
                | Self::UnknownParent { .. }
                | Self::Cycle { .. }
                | Self::InvalidRule { .. }
        )
    }

    pub(crate) fn io(input: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            input: input.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for RollupError {
    fn from(e: serde_json::Error) -> Self {
        RollupError::Serialize(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RollupError>;

// ---------------------------------------------------------------------------
// Row-level errors
// ---------------------------------------------------------------------------

/// A malformed record. Counted and sampled, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{input}:{line}: {kind}")]
pub struct RowError {
    /// Export the record came from (file path or `<stdin>`).
    pub input: String,
    /// 1-based line where the record starts.
    pub line: u64,
    pub kind: RowErrorKind,
}

impl RowError {
    pub fn new(input: impl Into<String>, line: u64, kind: RowErrorKind) -> Self {
        Self {
            input: input.into(),
            line,
            kind,
        }
    }

    /// Ordering used for diagnostic sampling: input, then line, then message.
    pub(crate) fn sample_key(&self) -> (&str, u64, String) {
        (&self.input, self.line, self.kind.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowErrorKind {
    FieldCount { expected: usize, found: usize },
    UnterminatedQuote,
    Csv { message: String },
    MissingValue { column: String },
    InvalidTimestamp { value: String },
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldCount { expected, found } => {
                write!(f, "expected {expected} fields, found {found}")
            }
            Self::UnterminatedQuote => write!(f, "unterminated quoted field"),
            Self::Csv { message } => write!(f, "{message}"),
            Self::MissingValue { column } => write!(f, "empty value in column '{column}'"),
            Self::InvalidTimestamp { value } => write!(f, "cannot parse timestamp '{value}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_error_display_includes_location() {
        let err = RowError::new(
            "exports/a.csv",
            12,
            RowErrorKind::FieldCount {
                expected: 3,
                found: 2,
            },
        );
        assert_eq!(err.to_string(), "exports/a.csv:12: expected 3 fields, found 2");
    }

    #[test]
    fn cycle_display_joins_chain() {
        let err = RollupError::Cycle {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cycle in organization hierarchy: a -> b -> a");
        assert!(err.is_configuration());
        assert!(!RollupError::Finalized.is_configuration());
    }

    #[test]
    fn row_error_kind_serializes_tagged() {
        let json = serde_json::to_string(&RowErrorKind::MissingValue {
            column: "recipe".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"missing_value","column":"recipe"}"#);
    }
}
