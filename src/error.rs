use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A propensity or voxel size left its mathematical domain.
    #[error("domain error: {0}")]
    Domain(String),
    #[error("expression error: {0}")]
    Expression(String),
    #[error("thread pool error: {0}")]
    ThreadPool(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("model parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;
