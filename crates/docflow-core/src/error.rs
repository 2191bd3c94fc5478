// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Docflow.

use std::time::Duration;

use thiserror::Error;

use crate::types::JobId;

/// Top-level error type for all Docflow operations.
#[derive(Debug, Error)]
pub enum DocflowError {
    // -- Stage errors --
    #[error("stage `{stage}` failed: {detail}")]
    StageFailure { stage: String, detail: String },

    #[error("stage `{stage}` timed out after {}s", timeout.as_secs())]
    StageTimeout { stage: String, timeout: Duration },

    // -- Job errors --
    #[error("job deadline exceeded before stage `{stage}` could start")]
    DeadlineExceeded { stage: String },

    #[error("job cancelled")]
    Cancelled,

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("remote service unavailable: {0}")]
    Unavailable(String),

    // -- Planning / configuration --
    #[error("invalid pipeline plan: {0}")]
    InvalidPlan(String),

    #[error("configuration error: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocflowError>;

/// Error returned by an external capability (OCR tool, correction service,
/// conversion engine).
///
/// The Stage Executor turns every variant into a typed stage result; these
/// never cross the sequencer boundary as faults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The capability ran and reported an error (non-zero exit, engine error).
    #[error("{0}")]
    Failed(String),

    /// The capability produced output that could not be understood.
    #[error("malformed output: {0}")]
    Malformed(String),

    /// The remote service could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
