// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Error taxonomy shared by the ingest, analysis and storage layers

use thiserror::Error;

use crate::buffer::TransportError;

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum VertacError {
    /// Stream id was never registered (or has been deregistered)
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Cycle id unknown to the cycle store
    #[error("cycle not found: {0}")]
    CycleNotFound(String),

    /// Dataset id unknown to the cycle store
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// Two cycles compared across datasets
    #[error("cycle {cycle_id} and {other_id} belong to different datasets")]
    DatasetMismatch { cycle_id: String, other_id: String },

    /// Dataset has no reference cycle to compare against
    #[error("dataset {0} has no reference cycle")]
    NoReferenceCycle(String),

    /// Network path to the backend failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local durable store failure
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VertacError {
    /// Transient errors are worth retrying; validation errors never are
    pub fn is_retryable(&self) -> bool {
        match self {
            VertacError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Validation errors are reported to the caller immediately
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VertacError::StreamNotFound(_)
                | VertacError::CycleNotFound(_)
                | VertacError::DatasetNotFound(_)
                | VertacError::DatasetMismatch { .. }
                | VertacError::NoReferenceCycle(_)
        )
    }
}

/// Crate result alias
pub type Result<T> = std::result::Result<T, VertacError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = VertacError::StreamNotFound("s-1".into());
        assert!(err.is_validation());
        assert!(!err.is_retryable());

        let err = VertacError::Transport(TransportError::Timeout);
        assert!(err.is_retryable());
        assert!(!err.is_validation());

        let err = VertacError::Transport(TransportError::Rejected { status: 422, message: String::new() });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = VertacError::DatasetMismatch {
            cycle_id: "a".into(),
            other_id: "b".into(),
        };
        assert_eq!(err.to_string(), "cycle a and b belong to different datasets");
    }
}
