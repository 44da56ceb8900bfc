//! Product quantization for the flatgraph ANN index.
//!
//! Splits vectors into subvectors, trains one k-means codebook per
//! subspace, and answers asymmetric (query vs code, via a per-query
//! lookup table) and symmetric (code vs code, via precomputed
//! centroid-pair tables) distances.

pub mod config;
pub mod error;
pub mod kmeans;
pub mod quantizer;

pub use config::{CentroidInit, PqParams};
pub use error::{PqError, PqResult};
pub use quantizer::ProductQuantizer;
