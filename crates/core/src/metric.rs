//! Distance metric definitions.

use serde::{Deserialize, Serialize};

/// Supported distance metrics for vector similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared Euclidean (L2) distance - lower is more similar
    L2,
    /// Inner-product distance (1 - dot product) - lower is more similar.
    /// Callers wanting angular distance must L2-normalize their vectors.
    InnerProduct,
}

impl Metric {
    /// Convert metric to byte representation for storage.
    pub fn to_byte(self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::InnerProduct => 1,
        }
    }

    /// Parse metric from byte representation.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Metric::L2),
            1 => Some(Metric::InnerProduct),
            _ => None,
        }
    }
}

impl Default for Metric {
    fn default() -> Self {
        Metric::L2
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::L2 => write!(f, "l2"),
            Metric::InnerProduct => write!(f, "ip"),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Metric::L2),
            "ip" | "angular" | "inner-product" => Ok(Metric::InnerProduct),
            _ => Err(format!("Unknown metric: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_byte_round_trip() {
        for metric in [Metric::L2, Metric::InnerProduct] {
            assert_eq!(Metric::from_byte(metric.to_byte()), Some(metric));
        }
        assert_eq!(Metric::from_byte(7), None);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Metric::from_str("l2").unwrap(), Metric::L2);
        assert_eq!(Metric::from_str("euclidean").unwrap(), Metric::L2);
        assert_eq!(Metric::from_str("angular").unwrap(), Metric::InnerProduct);
        assert!(Metric::from_str("hamming").is_err());
    }
}
