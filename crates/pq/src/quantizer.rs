//! The product quantizer: codebook training, encoding, and the
//! asymmetric/symmetric distance computations consumed by the graph.
//!
//! A vector of dimension `dim` is split into `m` subvectors of dimension
//! `dim / m`. Each subspace carries its own codebook of `k = 2^nbits`
//! centroids; a code is `m` bytes, byte `s` holding the id of the nearest
//! centroid in subspace `s`.
//!
//! Two distance paths are exposed:
//! - **ADC** (asymmetric): query stays uncompressed. [`ProductQuantizer::build_lut`]
//!   fills an `m x k` table of query-subvector-to-centroid distances once
//!   per query; [`ProductQuantizer::lut_distance`] then answers each
//!   query-vs-code distance with `m` table lookups.
//! - **SDC** (symmetric): code vs code, answered from `m` precomputed
//!   `k x k` centroid-pair tables built once after training.

use crate::config::PqParams;
use crate::error::{PqError, PqResult};
use crate::kmeans::kmeans;
use flatgraph_core::{distance, l2_distance_squared, Metric};
use rand::prelude::*;
use rayon::prelude::*;

/// A product quantizer over `dim`-dimensional vectors.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    dim: usize,
    num_subvectors: usize,
    nbits: u32,
    subvector_dim: usize,
    num_centroids: usize,
    metric: Metric,
    params: PqParams,
    /// Centroids stored as [m][k][subvector_dim], flattened.
    centroids: Vec<f32>,
    /// Symmetric distance tables, [m][k][k] flattened. Empty until trained.
    sdc: Vec<f32>,
    trained: bool,
}

impl ProductQuantizer {
    /// Create an untrained quantizer.
    pub fn new(dim: usize, metric: Metric, params: PqParams) -> PqResult<Self> {
        params.validate(dim).map_err(PqError::InvalidParams)?;

        let num_subvectors = params.num_subvectors;
        let nbits = params.nbits;
        let subvector_dim = dim / num_subvectors;
        let num_centroids = params.num_centroids();

        Ok(Self {
            dim,
            num_subvectors,
            nbits,
            subvector_dim,
            num_centroids,
            metric,
            params,
            centroids: vec![0.0; num_subvectors * num_centroids * subvector_dim],
            sdc: Vec::new(),
            trained: false,
        })
    }

    /// Whether the codebooks have been trained.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Size of one code in bytes (one byte per subvector).
    pub fn code_size(&self) -> usize {
        self.num_subvectors
    }

    /// Dimension of the vectors this quantizer encodes.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of subvectors (m).
    pub fn num_subvectors(&self) -> usize {
        self.num_subvectors
    }

    /// Number of centroids per subspace (k).
    pub fn num_centroids(&self) -> usize {
        self.num_centroids
    }

    /// The metric used for asymmetric and symmetric distances.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Centroid `c` of subspace `s`.
    #[inline]
    fn centroid(&self, s: usize, c: usize) -> &[f32] {
        let offset = (s * self.num_centroids + c) * self.subvector_dim;
        &self.centroids[offset..offset + self.subvector_dim]
    }

    /// Subvector `s` of a full vector.
    #[inline]
    fn subvector<'a>(&self, vector: &'a [f32], s: usize) -> &'a [f32] {
        let start = s * self.subvector_dim;
        &vector[start..start + self.subvector_dim]
    }

    /// Train the codebooks on `n` vectors stored flat in `vectors`.
    ///
    /// Each subspace is clustered independently (in parallel). Fails with
    /// [`PqError::InsufficientSamples`] when fewer training points than
    /// centroids are available.
    pub fn train(&mut self, vectors: &[f32], n: usize) -> PqResult<()> {
        if vectors.len() != n * self.dim {
            return Err(PqError::InvalidData(format!(
                "training data length {} does not match {} vectors of dim {}",
                vectors.len(),
                n,
                self.dim
            )));
        }

        // Optional subsampling before the n >= k check, so the check covers
        // what k-means will actually see.
        let train_idx: Vec<usize> = match self.params.max_training_samples {
            Some(cap) if cap < n => {
                let mut rng = match self.params.seed {
                    Some(s) => StdRng::seed_from_u64(s),
                    None => StdRng::from_entropy(),
                };
                let mut indices: Vec<usize> = (0..n).collect();
                indices.shuffle(&mut rng);
                indices.truncate(cap);
                indices
            }
            _ => (0..n).collect(),
        };

        if train_idx.len() < self.num_centroids {
            return Err(PqError::InsufficientSamples {
                min: self.num_centroids,
                got: train_idx.len(),
            });
        }

        let dim = self.dim;
        let dsub = self.subvector_dim;
        let k = self.num_centroids;
        let iterations = self.params.train_iterations;
        let init = self.params.init;
        let seed = self.params.seed;

        let codebooks: Vec<Vec<f32>> = (0..self.num_subvectors)
            .into_par_iter()
            .map(|s| {
                let start = s * dsub;
                let mut subvectors = Vec::with_capacity(train_idx.len() * dsub);
                for &i in &train_idx {
                    subvectors.extend_from_slice(&vectors[i * dim + start..i * dim + start + dsub]);
                }
                let mut rng = match seed {
                    Some(s0) => StdRng::seed_from_u64(s0.wrapping_add(s as u64)),
                    None => StdRng::from_entropy(),
                };
                kmeans(&subvectors, dsub, k, iterations, init, &mut rng)
            })
            .collect();

        for (s, part) in codebooks.into_iter().enumerate() {
            let offset = s * k * dsub;
            self.centroids[offset..offset + part.len()].copy_from_slice(&part);
        }

        self.trained = true;
        self.build_sdc_tables();
        Ok(())
    }

    /// Precompute the per-subspace centroid-pair distance tables.
    fn build_sdc_tables(&mut self) {
        let k = self.num_centroids;
        let mut sdc = vec![0.0f32; self.num_subvectors * k * k];
        for s in 0..self.num_subvectors {
            for i in 0..k {
                for j in 0..k {
                    sdc[(s * k + i) * k + j] =
                        distance(self.centroid(s, i), self.centroid(s, j), self.metric);
                }
            }
        }
        self.sdc = sdc;
    }

    /// Encode a vector into `dst` (one byte per subvector).
    ///
    /// Assignment is to the nearest centroid by squared L2, matching how
    /// the codebooks were clustered.
    pub fn compute_code(&self, vector: &[f32], dst: &mut [u8]) -> PqResult<()> {
        if !self.trained {
            return Err(PqError::NotTrained);
        }
        if vector.len() != self.dim {
            return Err(PqError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        if dst.len() != self.num_subvectors {
            return Err(PqError::InvalidData(format!(
                "code buffer of {} bytes, expected {}",
                dst.len(),
                self.num_subvectors
            )));
        }

        for s in 0..self.num_subvectors {
            let subvec = self.subvector(vector, s);
            let mut best_c = 0usize;
            let mut best_dist = f32::MAX;
            for c in 0..self.num_centroids {
                let dist = l2_distance_squared(subvec, self.centroid(s, c));
                if dist < best_dist {
                    best_dist = dist;
                    best_c = c;
                }
            }
            dst[s] = best_c as u8;
        }
        Ok(())
    }

    /// Encode a vector into a freshly allocated code.
    pub fn encode(&self, vector: &[f32]) -> PqResult<Vec<u8>> {
        let mut code = vec![0u8; self.num_subvectors];
        self.compute_code(vector, &mut code)?;
        Ok(code)
    }

    /// Fill the per-query ADC lookup table: `lut[s * k + c]` is the metric
    /// distance from the query's subvector `s` to centroid `c`.
    ///
    /// Built once when a query starts and reused across every
    /// [`Self::lut_distance`] call of that search.
    pub fn build_lut(&self, query: &[f32], lut: &mut Vec<f32>) -> PqResult<()> {
        if !self.trained {
            return Err(PqError::NotTrained);
        }
        if query.len() != self.dim {
            return Err(PqError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }

        let k = self.num_centroids;
        lut.clear();
        lut.resize(self.num_subvectors * k, 0.0);
        for s in 0..self.num_subvectors {
            let subvec = self.subvector(query, s);
            for c in 0..k {
                lut[s * k + c] = distance(subvec, self.centroid(s, c), self.metric);
            }
        }
        Ok(())
    }

    /// Asymmetric distance answered from a table built by [`Self::build_lut`].
    #[inline]
    pub fn lut_distance(&self, lut: &[f32], code: &[u8]) -> f32 {
        debug_assert_eq!(lut.len(), self.num_subvectors * self.num_centroids);
        debug_assert_eq!(code.len(), self.num_subvectors);

        let k = self.num_centroids;
        let mut dist = 0.0f32;
        for (s, &c) in code.iter().enumerate() {
            dist += lut[s * k + c as usize];
        }
        dist
    }

    /// Asymmetric distance computed directly, without a table.
    ///
    /// Sums subspace distances in the same order as the LUT path, so for a
    /// given query and code the two agree exactly.
    pub fn distance(&self, query: &[f32], code: &[u8]) -> PqResult<f32> {
        if !self.trained {
            return Err(PqError::NotTrained);
        }
        if query.len() != self.dim {
            return Err(PqError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }

        let mut dist = 0.0f32;
        for (s, &c) in code.iter().enumerate() {
            dist += distance(
                self.subvector(query, s),
                self.centroid(s, c as usize),
                self.metric,
            );
        }
        Ok(dist)
    }

    /// Symmetric (code vs code) distance from the precomputed tables.
    ///
    /// The quantizer must be trained; graph construction enforces this
    /// before any code exists to compare.
    #[inline]
    pub fn symmetric_distance(&self, code_a: &[u8], code_b: &[u8]) -> f32 {
        debug_assert!(self.trained, "symmetric_distance on untrained quantizer");
        debug_assert_eq!(code_a.len(), self.num_subvectors);
        debug_assert_eq!(code_b.len(), self.num_subvectors);

        let k = self.num_centroids;
        let mut dist = 0.0f32;
        for s in 0..self.num_subvectors {
            dist += self.sdc[(s * k + code_a[s] as usize) * k + code_b[s] as usize];
        }
        dist
    }

    /// Reconstruct the approximate vector a code stands for.
    pub fn decode(&self, code: &[u8]) -> PqResult<Vec<f32>> {
        if !self.trained {
            return Err(PqError::NotTrained);
        }
        if code.len() != self.num_subvectors {
            return Err(PqError::InvalidData(format!(
                "code of {} bytes, expected {}",
                code.len(),
                self.num_subvectors
            )));
        }

        let mut vector = Vec::with_capacity(self.dim);
        for (s, &c) in code.iter().enumerate() {
            if c as usize >= self.num_centroids {
                return Err(PqError::InvalidCode(c as usize));
            }
            vector.extend_from_slice(self.centroid(s, c as usize));
        }
        Ok(vector)
    }

    /// Serialize to bytes (little-endian) for embedding in an index file.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Format: [dim: u32][m: u32][nbits: u32][metric: u8][trained: u8]
        //         [centroids: f32 array][sdc: f32 array, only when trained]
        let mut bytes = Vec::with_capacity(14 + self.centroids.len() * 4 + self.sdc.len() * 4);

        bytes.extend_from_slice(&(self.dim as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.num_subvectors as u32).to_le_bytes());
        bytes.extend_from_slice(&self.nbits.to_le_bytes());
        bytes.push(self.metric.to_byte());
        bytes.push(self.trained as u8);

        for &c in &self.centroids {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        if self.trained {
            for &d in &self.sdc {
                bytes.extend_from_slice(&d.to_le_bytes());
            }
        }

        bytes
    }

    /// Deserialize from bytes produced by [`Self::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> PqResult<Self> {
        if data.len() < 14 {
            return Err(PqError::InvalidData("quantizer block too short".into()));
        }

        let dim = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        let num_subvectors = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
        let nbits = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let metric = Metric::from_byte(data[12])
            .ok_or_else(|| PqError::InvalidData(format!("invalid metric byte {}", data[12])))?;
        let trained = data[13] != 0;

        let params = PqParams::new(num_subvectors, nbits);
        params.validate(dim).map_err(PqError::InvalidParams)?;

        let subvector_dim = dim / num_subvectors;
        let num_centroids = params.num_centroids();
        let num_centroid_floats = num_subvectors * num_centroids * subvector_dim;
        let num_sdc_floats = if trained {
            num_subvectors * num_centroids * num_centroids
        } else {
            0
        };

        let expected = 14 + (num_centroid_floats + num_sdc_floats) * 4;
        if data.len() < expected {
            return Err(PqError::InvalidData(format!(
                "quantizer block of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        let read_f32s = |offset: usize, count: usize| -> Vec<f32> {
            (0..count)
                .map(|i| {
                    let at = offset + i * 4;
                    f32::from_le_bytes(data[at..at + 4].try_into().unwrap())
                })
                .collect()
        };

        let centroids = read_f32s(14, num_centroid_floats);
        let sdc = read_f32s(14 + num_centroid_floats * 4, num_sdc_floats);

        Ok(Self {
            dim,
            num_subvectors,
            nbits,
            subvector_dim,
            num_centroids,
            metric,
            params,
            centroids,
            sdc,
            trained,
        })
    }

    /// Size in bytes when serialized with [`Self::to_bytes`].
    pub fn byte_size(&self) -> usize {
        14 + (self.centroids.len() + self.sdc.len()) * 4
    }
}
