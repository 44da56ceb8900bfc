//! PQ configuration types.

use serde::{Deserialize, Serialize};

/// Centroid initialization strategy for k-means training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CentroidInit {
    /// Sample k distinct training points uniformly at random.
    #[default]
    Random,
    /// k-means++ seeding (Arthur & Vassilvitskii).
    KmeansPlusPlus,
}

impl std::fmt::Display for CentroidInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CentroidInit::Random => write!(f, "random"),
            CentroidInit::KmeansPlusPlus => write!(f, "kmeans++"),
        }
    }
}

impl std::str::FromStr for CentroidInit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "random" | "default" => Ok(CentroidInit::Random),
            "kmeans++" | "kmeanspp" => Ok(CentroidInit::KmeansPlusPlus),
            _ => Err(format!("Unknown centroid initialization: {}", s)),
        }
    }
}

/// Parameters for product quantization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqParams {
    /// Number of subvectors (m). The dimension must be divisible by m.
    /// Typical values: 4, 8, 16
    pub num_subvectors: usize,

    /// Bits per subvector code. Centroids per subspace k = 2^nbits.
    /// Must be in 1..=8 so a code is one byte per subvector.
    pub nbits: u32,

    /// Number of k-means iterations per subspace.
    pub train_iterations: usize,

    /// Cap on training samples per subspace. If None, use all provided vectors.
    pub max_training_samples: Option<usize>,

    /// Centroid initialization strategy.
    pub init: CentroidInit,

    /// Random seed for reproducibility.
    pub seed: Option<u64>,
}

impl PqParams {
    /// Create new PQ parameters with defaults.
    pub fn new(num_subvectors: usize, nbits: u32) -> Self {
        Self {
            num_subvectors,
            nbits,
            train_iterations: 25,
            max_training_samples: None,
            init: CentroidInit::Random,
            seed: None,
        }
    }

    /// Set number of k-means iterations.
    pub fn with_train_iterations(mut self, iterations: usize) -> Self {
        self.train_iterations = iterations;
        self
    }

    /// Cap the number of training samples.
    pub fn with_max_training_samples(mut self, samples: usize) -> Self {
        self.max_training_samples = Some(samples);
        self
    }

    /// Set the centroid initialization strategy.
    pub fn with_init(mut self, init: CentroidInit) -> Self {
        self.init = init;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of centroids per subspace.
    pub fn num_centroids(&self) -> usize {
        1usize << self.nbits
    }

    /// Get the subvector dimension.
    pub fn subvector_dim(&self, dim: usize) -> usize {
        dim / self.num_subvectors
    }

    /// Validate parameters against a dimension.
    pub fn validate(&self, dim: usize) -> Result<(), String> {
        if self.num_subvectors == 0 {
            return Err("num_subvectors must be > 0".to_string());
        }
        if self.nbits == 0 || self.nbits > 8 {
            return Err(format!("nbits must be in 1..=8, got {}", self.nbits));
        }
        if dim == 0 || dim % self.num_subvectors != 0 {
            return Err(format!(
                "dimension {} is not divisible by num_subvectors {}",
                dim, self.num_subvectors
            ));
        }
        if self.train_iterations == 0 {
            return Err("train_iterations must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for PqParams {
    fn default() -> Self {
        Self::new(8, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_validation() {
        let params = PqParams::new(8, 8);
        assert!(params.validate(128).is_ok());
        assert!(params.validate(64).is_ok());
        assert!(params.validate(100).is_err()); // Not divisible by 8

        assert!(PqParams::new(0, 8).validate(128).is_err());
        assert!(PqParams::new(8, 0).validate(128).is_err());
        assert!(PqParams::new(8, 9).validate(128).is_err());
    }

    #[test]
    fn test_num_centroids() {
        assert_eq!(PqParams::new(8, 8).num_centroids(), 256);
        assert_eq!(PqParams::new(8, 4).num_centroids(), 16);
    }

    #[test]
    fn test_subvector_dim() {
        let params = PqParams::new(8, 8);
        assert_eq!(params.subvector_dim(128), 16);
        assert_eq!(params.subvector_dim(768), 96);
    }

    #[test]
    fn test_init_from_str() {
        assert_eq!(
            CentroidInit::from_str("random").unwrap(),
            CentroidInit::Random
        );
        assert_eq!(
            CentroidInit::from_str("kmeans++").unwrap(),
            CentroidInit::KmeansPlusPlus
        );
        assert!(CentroidInit::from_str("spectral").is_err());
    }
}
