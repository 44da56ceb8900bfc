//! The flat navigable-small-world graph.
//!
//! A single-layer graph over the node store. Insertion runs a beam
//! search from a deterministically chosen entry point, prunes the
//! result with the HNSW diversity heuristic, and back-links the new
//! node into its neighbors (re-pruning any neighbor whose list is
//! full). Queries run the same beam search and keep the `ef` closest
//! nodes seen.
//!
//! With a quantizer attached, every payload is a PQ code:
//! query-to-node distances go through a per-query lookup table built
//! once per `add`/`search`, and node-to-node distances through the
//! quantizer's symmetric tables.

use crate::error::{GraphError, GraphResult};
use crate::store::NodeStore;
use crate::visited::VisitedSet;
use flatgraph_core::{distance, Metric};
use flatgraph_pq::ProductQuantizer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Default number of probes for entry-point selection.
pub const DEFAULT_NUM_INITIALIZATIONS: usize = 100;

/// Construction parameters for a [`FlatGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Maximum out-degree per node (M).
    /// Higher values = better recall but more memory and slower inserts.
    /// Typical range: 8-48
    pub max_degree: usize,

    /// Maximum number of nodes. The store is preallocated to this size
    /// and never grows.
    pub capacity: usize,

    /// Distance metric.
    pub metric: Metric,

    /// Number of probes in the strided entry-point scan.
    pub num_initializations: usize,
}

impl GraphConfig {
    /// Create a config with default metric (L2) and probe count.
    pub fn new(capacity: usize, max_degree: usize) -> Self {
        Self {
            max_degree,
            capacity,
            metric: Metric::L2,
            num_initializations: DEFAULT_NUM_INITIALIZATIONS,
        }
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the entry-point probe count.
    pub fn with_num_initializations(mut self, n: usize) -> Self {
        self.num_initializations = n;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> GraphResult<()> {
        if self.max_degree == 0 {
            return Err(GraphError::InvalidParams("max_degree must be > 0".into()));
        }
        if self.capacity == 0 {
            return Err(GraphError::InvalidParams("capacity must be > 0".into()));
        }
        if self.num_initializations == 0 {
            return Err(GraphError::InvalidParams(
                "num_initializations must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// One search hit: distance to the query and the node's external label.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub distance: f32,
    pub label: u64,
}

/// Result-heap entry. Natural order by distance, so `BinaryHeap` keeps
/// the worst result on top for eviction.
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    distance: f32,
    id: u32,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Candidate-heap entry. Ordering is reversed so `BinaryHeap` pops the
/// closest candidate first.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// A flat (single-layer) proximity graph index.
pub struct FlatGraph {
    pub(crate) config: GraphConfig,
    pub(crate) dim: usize,
    pub(crate) store: NodeStore,
    pub(crate) visited: VisitedSet,
    pub(crate) quantizer: Option<ProductQuantizer>,
    /// Per-query ADC table, rebuilt at the start of every add/search.
    lut: Vec<f32>,
    /// Scratch for encoding the vector being inserted.
    code_scratch: Vec<u8>,
}

impl FlatGraph {
    /// Create an index storing raw vectors.
    pub fn new(dim: usize, config: GraphConfig) -> GraphResult<Self> {
        config.validate()?;
        if dim == 0 {
            return Err(GraphError::InvalidParams("dimension must be > 0".into()));
        }
        let store = NodeStore::for_vectors(dim, config.max_degree, config.capacity);
        let visited = VisitedSet::new(config.capacity);
        Ok(Self {
            config,
            dim,
            store,
            visited,
            quantizer: None,
            lut: Vec::new(),
            code_scratch: Vec::new(),
        })
    }

    /// Create an index storing PQ codes produced by `quantizer`.
    ///
    /// The quantizer must already be trained and agree with the index on
    /// dimension and metric.
    pub fn with_quantizer(
        dim: usize,
        config: GraphConfig,
        quantizer: ProductQuantizer,
    ) -> GraphResult<Self> {
        config.validate()?;
        if !quantizer.is_trained() {
            return Err(GraphError::QuantizerNotTrained);
        }
        if quantizer.dim() != dim {
            return Err(GraphError::DimensionMismatch {
                expected: dim,
                got: quantizer.dim(),
            });
        }
        if quantizer.metric() != config.metric {
            return Err(GraphError::InvalidParams(format!(
                "quantizer metric {} does not match index metric {}",
                quantizer.metric(),
                config.metric
            )));
        }
        let store = NodeStore::for_codes(quantizer.code_size(), config.max_degree, config.capacity);
        let visited = VisitedSet::new(config.capacity);
        Ok(Self {
            config,
            dim,
            store,
            visited,
            quantizer: Some(quantizer),
            lut: Vec::new(),
            code_scratch: Vec::new(),
        })
    }

    /// Reassemble a graph from restored parts (persistence path).
    pub(crate) fn from_parts(
        config: GraphConfig,
        dim: usize,
        store: NodeStore,
        visited: VisitedSet,
        quantizer: Option<ProductQuantizer>,
    ) -> Self {
        Self {
            config,
            dim,
            store,
            visited,
            quantizer,
            lut: Vec::new(),
            code_scratch: Vec::new(),
        }
    }

    /// Number of nodes in the index.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the index holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Maximum number of nodes.
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Maximum out-degree per node.
    pub fn max_degree(&self) -> usize {
        self.config.max_degree
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Distance metric.
    pub fn metric(&self) -> Metric {
        self.config.metric
    }

    /// Whether payloads are PQ codes.
    pub fn is_quantized(&self) -> bool {
        self.quantizer.is_some()
    }

    /// The raw link slots of a node, self-loop sentinels included.
    pub fn link_slots(&self, id: u32) -> &[u32] {
        self.store.links(id)
    }

    /// The out-neighbors of a node, self-loop sentinels filtered.
    pub fn neighbors(&self, id: u32) -> impl Iterator<Item = u32> + '_ {
        self.store.links(id).iter().copied().filter(move |&v| v != id)
    }

    /// The external label of a node.
    pub fn label(&self, id: u32) -> u64 {
        self.store.label(id)
    }

    /// The stored vector of a node. `None` on a quantized index.
    pub fn vector(&self, id: u32) -> Option<&[f32]> {
        if self.is_quantized() {
            None
        } else {
            Some(self.store.vector(id))
        }
    }

    /// The stored PQ code of a node. `None` on an exact index.
    pub fn code(&self, id: u32) -> Option<&[u8]> {
        if self.is_quantized() {
            Some(self.store.code(id))
        } else {
            None
        }
    }

    /// Insert a vector with its label.
    ///
    /// Returns `Ok(false)` when the index is at capacity; the vector was
    /// not inserted and callers batching inserts should stop. The first
    /// insert returns `Ok(true)` like any other: the node is live and
    /// searchable, it just gains its in-edges from later inserts.
    pub fn add(&mut self, vector: &[f32], label: u64, ef_construction: usize) -> GraphResult<bool> {
        if vector.len() != self.dim {
            return Err(GraphError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        if ef_construction == 0 {
            return Err(GraphError::InvalidParams(
                "ef_construction must be > 0".into(),
            ));
        }
        if self.store.is_full() {
            return Ok(false);
        }

        // The entry point must be chosen before the new node exists: a
        // freshly allocated node is at distance zero from its own payload
        // and would be picked as the "optimal" entry, skipping the search.
        self.prepare_query(vector)?;
        let entry = self.entry_point(vector);

        let new_id = match &self.quantizer {
            Some(pq) => {
                self.code_scratch.resize(pq.code_size(), 0);
                pq.compute_code(vector, &mut self.code_scratch)?;
                self.store.allocate_code(&self.code_scratch, label)
            }
            None => self.store.allocate_vector(vector, label),
        };
        let Some(new_id) = new_id else {
            return Ok(false);
        };

        if new_id == 0 {
            // Nothing to connect to yet.
            return Ok(true);
        }

        let mut neighbors = self.beam_search(vector, entry, ef_construction);
        self.select_neighbors(&mut neighbors, self.config.max_degree);
        self.connect_neighbors(neighbors, new_id);
        Ok(true)
    }

    /// Top-`k` nearest neighbors of `query`, sorted by ascending distance.
    ///
    /// `ef_search` bounds the beam width and must be at least `k`.
    pub fn search(
        &mut self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> GraphResult<Vec<SearchResult>> {
        if query.len() != self.dim {
            return Err(GraphError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        if k == 0 {
            return Err(GraphError::InvalidParams("k must be > 0".into()));
        }
        if ef_search < k {
            return Err(GraphError::SearchWidthTooSmall { ef: ef_search, k });
        }
        if self.store.is_empty() {
            return Err(GraphError::EmptyIndex);
        }

        self.prepare_query(query)?;
        let entry = self.entry_point(query);
        let mut neighbors = self.beam_search(query, entry, ef_search);

        while neighbors.len() > k {
            neighbors.pop();
        }

        let mut results: Vec<SearchResult> = neighbors
            .into_iter()
            .map(|n| SearchResult {
                distance: n.distance,
                label: self.store.label(n.id),
            })
            .collect();
        results.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        Ok(results)
    }

    /// Rebuild the per-query scratch for a fresh query.
    fn prepare_query(&mut self, query: &[f32]) -> GraphResult<()> {
        if let Some(pq) = &self.quantizer {
            pq.build_lut(query, &mut self.lut)?;
        }
        Ok(())
    }

    /// Distance from the current query to a stored node.
    ///
    /// Quantized indexes answer from the LUT built by `prepare_query`.
    #[inline]
    fn query_node_distance(&self, query: &[f32], id: u32) -> f32 {
        match &self.quantizer {
            Some(pq) => pq.lut_distance(&self.lut, self.store.code(id)),
            None => distance(query, self.store.vector(id), self.config.metric),
        }
    }

    /// Distance between two stored nodes (symmetric metric).
    #[inline]
    fn node_pair_distance(&self, a: u32, b: u32) -> f32 {
        match &self.quantizer {
            Some(pq) => pq.symmetric_distance(self.store.code(a), self.store.code(b)),
            None => distance(
                self.store.vector(a),
                self.store.vector(b),
                self.config.metric,
            ),
        }
    }

    /// Pick a search entry point by probing nodes at a fixed stride.
    ///
    /// Deterministic and O(num_initializations) regardless of occupancy.
    /// Returns 0 on an empty graph; callers never search an empty graph.
    fn entry_point(&self, query: &[f32]) -> u32 {
        let len = self.store.len();
        let step = (len / self.config.num_initializations).max(1);

        let mut best = 0u32;
        let mut best_dist = f32::MAX;
        let mut node = 0usize;
        while node < len {
            let dist = self.query_node_distance(query, node as u32);
            if dist < best_dist {
                best_dist = dist;
                best = node as u32;
            }
            node += step;
        }
        best
    }

    /// Best-first search keeping the `ef` closest nodes seen.
    ///
    /// Returns the result set as a max-heap (worst on top). The frontier
    /// stops as soon as the closest open candidate is farther than the
    /// worst kept result, which can only tighten monotonically.
    fn beam_search(&mut self, query: &[f32], entry: u32, ef: usize) -> BinaryHeap<Neighbor> {
        let mut results: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(ef + 1);
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();

        self.visited.clear();
        let dist = self.query_node_distance(query, entry);
        let mut max_dist = dist;

        candidates.push(Candidate { distance: dist, id: entry });
        results.push(Neighbor { distance: dist, id: entry });
        self.visited.insert(entry);

        while let Some(current) = candidates.pop() {
            if current.distance > max_dist {
                break;
            }
            for i in 0..self.config.max_degree {
                let neighbor = self.store.links(current.id)[i];
                // Self-loop sentinels are absorbed here: the owner was
                // visited before its links were expanded.
                if self.visited.insert(neighbor) {
                    let dist = self.query_node_distance(query, neighbor);
                    if results.len() < ef || dist < max_dist {
                        candidates.push(Candidate { distance: dist, id: neighbor });
                        results.push(Neighbor { distance: dist, id: neighbor });
                        if results.len() > ef {
                            results.pop();
                        }
                        if let Some(worst) = results.peek() {
                            max_dist = worst.distance;
                        }
                    }
                }
            }
        }

        results
    }

    /// Prune a result set to at most `m_out` diverse neighbors.
    ///
    /// A candidate is kept only if no already-kept neighbor is closer to
    /// it than the query is; this spreads the neighborhood over
    /// directions instead of clumping it.
    fn select_neighbors(&self, neighbors: &mut BinaryHeap<Neighbor>, m_out: usize) {
        if neighbors.len() <= m_out {
            return;
        }

        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(neighbors.len());
        while let Some(n) = neighbors.pop() {
            candidates.push(Candidate {
                distance: n.distance,
                id: n.id,
            });
        }

        let mut kept: Vec<Candidate> = Vec::with_capacity(m_out);
        while let Some(current) = candidates.pop() {
            if kept.len() >= m_out {
                break;
            }
            let diverse = kept
                .iter()
                .all(|k| self.node_pair_distance(k.id, current.id) >= current.distance);
            if diverse {
                kept.push(current);
            }
        }

        for c in kept {
            neighbors.push(Neighbor {
                distance: c.distance,
                id: c.id,
            });
        }
    }

    /// Wire the new node into the graph.
    ///
    /// Forward links fill the new node's slots. Each reverse link takes a
    /// free (self-loop) slot when one exists; a full neighbor list is
    /// re-pruned through the selection heuristic over its old links plus
    /// the new node, so the diversity invariant holds on every node.
    fn connect_neighbors(&mut self, mut neighbors: BinaryHeap<Neighbor>, new_id: u32) {
        let m = self.config.max_degree;
        let mut slot = 0usize;

        while let Some(Neighbor { id: neighbor_id, .. }) = neighbors.pop() {
            self.store.links_mut(new_id)[slot] = neighbor_id;
            slot += 1;

            let mut inserted = false;
            {
                let links = self.store.links_mut(neighbor_id);
                for entry in links.iter_mut() {
                    if *entry == neighbor_id {
                        *entry = new_id;
                        inserted = true;
                        break;
                    }
                }
            }

            if !inserted {
                // The neighbor's list is full. Dropping an arbitrary link
                // would break the pruning invariant, so rebuild the list
                // from the old links plus the new node and prune that.
                let mut candidates: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(m + 1);
                candidates.push(Neighbor {
                    distance: self.node_pair_distance(neighbor_id, new_id),
                    id: new_id,
                });
                for i in 0..m {
                    let v = self.store.links(neighbor_id)[i];
                    if v != neighbor_id {
                        candidates.push(Neighbor {
                            distance: self.node_pair_distance(neighbor_id, v),
                            id: v,
                        });
                    }
                }
                self.select_neighbors(&mut candidates, m);

                let mut i = 0usize;
                while let Some(winner) = candidates.pop() {
                    self.store.links_mut(neighbor_id)[i] = winner.id;
                    i += 1;
                }
                for j in i..m {
                    self.store.links_mut(neighbor_id)[j] = neighbor_id;
                }
            }
        }
    }
}
