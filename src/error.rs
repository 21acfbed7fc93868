//! Error taxonomy of the optimization core
//!
//! Validation errors come back to the caller of `start`; data-fetch and
//! computation errors end a job as `failed` with the message stored verbatim;
//! store errors propagate to whoever called the store operation. Nothing here
//! is retried.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("market data unavailable: {0}")]
    DataFetch(String),

    #[error("computation failed: {0}")]
    Computation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OptimizerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    /// Client-side errors are not worth retrying with the same input
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Failures of the directory-backed result store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt result file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid result id: {0:?}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
