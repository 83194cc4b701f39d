//! Error taxonomy shared by every pipeline component.
//!
//! Each component keeps its own `thiserror` enum; `Classify` maps those onto
//! the small set of kinds the orchestrator and stages reason about.

use serde::{Deserialize, Serialize};

/// Coarse error category used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Zone store, catalog or warehouse unreachable, permission denied, I/O failure.
    Storage,
    /// Missing key, table or document.
    NotFound,
    /// Malformed record or argument.
    Validation,
    /// Identity-key race that outlived its retries.
    Conflict,
    /// Non-numeric or missing field in an aggregate.
    Aggregation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Aggregation => "aggregation",
        }
    }

    /// Whether an operation failing with this kind may be retried blindly.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage | Self::Conflict)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every component error.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::Storage.is_transient());
        assert!(ErrorKind::Conflict.is_transient());
        assert!(!ErrorKind::NotFound.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
