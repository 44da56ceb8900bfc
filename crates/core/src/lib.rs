//! Core vector operations and distance metrics for the flatgraph ANN index.

pub mod distance;
pub mod metric;

pub use distance::{
    distance, dot_product, inner_product_distance, l2_distance_squared, l2_norm, normalize,
    normalized,
};
pub use metric::Metric;
