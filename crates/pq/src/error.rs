//! PQ error types.

use thiserror::Error;

/// PQ-related errors.
#[derive(Error, Debug)]
pub enum PqError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Not enough training samples: need at least {min}, got {got}")]
    InsufficientSamples { min: usize, got: usize },

    #[error("Quantizer not trained")]
    NotTrained,

    #[error("Invalid code index: {0}")]
    InvalidCode(usize),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type PqResult<T> = Result<T, PqError>;
