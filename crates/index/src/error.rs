//! Graph index error types.

use flatgraph_pq::PqError;
use thiserror::Error;

/// Errors produced by the graph index.
///
/// Capacity exhaustion is deliberately not represented here: `add`
/// reports it as `Ok(false)` so batch loaders can stop early without
/// error plumbing.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index is empty")]
    EmptyIndex,

    #[error("Search width ef={ef} is smaller than k={k}")]
    SearchWidthTooSmall { ef: usize, k: usize },

    #[error("Product quantizer must be trained before use")]
    QuantizerNotTrained,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Quantizer error: {0}")]
    Pq(#[from] PqError),
}

pub type GraphResult<T> = Result<T, GraphError>;
