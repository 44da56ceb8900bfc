//! Flat navigable-small-world graph index.
//!
//! A single-layer proximity graph over a fixed-capacity node store.
//! Vectors are inserted once (optionally compressed to PQ codes), then
//! searched many times with beam search. The graph can be reordered
//! (Gorder or Reverse Cuthill-McKee) for traversal locality and
//! persisted to a single binary file.
//!
//! # Example
//! ```ignore
//! use flatgraph_index::{FlatGraph, GraphConfig};
//!
//! let mut index = FlatGraph::new(128, GraphConfig::new(100_000, 16))?;
//! for (label, vector) in vectors.iter().enumerate() {
//!     index.add(vector, label as u64, 100)?;
//! }
//! let hits = index.search(&query, 10, 50)?;
//! ```

pub mod error;
pub mod graph;
pub mod persistence;
pub mod reorder;
pub mod store;
pub mod visited;

pub use error::{GraphError, GraphResult};
pub use graph::{FlatGraph, GraphConfig, SearchResult, DEFAULT_NUM_INITIALIZATIONS};
pub use persistence::{INDEX_MAGIC, INDEX_VERSION};
pub use reorder::{gorder, rcm, ReorderAlgorithm};
pub use store::NodeStore;
pub use visited::VisitedSet;
