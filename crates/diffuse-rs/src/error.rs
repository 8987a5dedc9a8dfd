use std::io;

use thiserror::Error;

use crate::backend::BackendError;

/// Error taxonomy for the deployment layer.
///
/// Every error propagates to the immediate caller; the layer never retries a
/// failed compilation and never falls back to eager execution on its own.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to load runtime state: {0}")]
    Load(String),
    #[error("operation not valid in the current graph state: {0}")]
    InvalidState(String),
    #[error("input shape outside the graph's dynamism budget: {0}")]
    ShapeMismatch(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("module error: {0}")]
    Module(anyhow::Error),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Module(err)
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
