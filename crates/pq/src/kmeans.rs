//! K-means clustering over one quantizer subspace.

use crate::config::CentroidInit;
use flatgraph_core::l2_distance_squared;
use rand::prelude::*;

/// Run k-means on `n` points of dimension `dim` stored flat in `points`.
///
/// Returns `k * dim` centroid floats. Assignment uses squared L2; the
/// update step accumulates in f64. A cluster that loses all its members
/// keeps its previous centroid.
pub fn kmeans(
    points: &[f32],
    dim: usize,
    k: usize,
    iterations: usize,
    init: CentroidInit,
    rng: &mut StdRng,
) -> Vec<f32> {
    let n = points.len() / dim;
    debug_assert!(n >= k, "k-means needs at least k points");

    let mut centroids = match init {
        CentroidInit::Random => random_init(points, dim, n, k, rng),
        CentroidInit::KmeansPlusPlus => kmeans_plusplus_init(points, dim, n, k, rng),
    };
    let mut assignments = vec![0usize; n];

    for _ in 0..iterations {
        // Assignment step
        for (i, point) in points.chunks_exact(dim).enumerate() {
            let mut best_k = 0;
            let mut best_dist = f32::MAX;
            for (ki, centroid) in centroids.chunks_exact(dim).enumerate() {
                let dist = l2_distance_squared(point, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best_k = ki;
                }
            }
            assignments[i] = best_k;
        }

        // Update step
        let mut sums = vec![0.0f64; k * dim];
        let mut counts = vec![0usize; k];

        for (i, point) in points.chunks_exact(dim).enumerate() {
            let ki = assignments[i];
            counts[ki] += 1;
            let offset = ki * dim;
            for (j, &v) in point.iter().enumerate() {
                sums[offset + j] += v as f64;
            }
        }

        for ki in 0..k {
            if counts[ki] > 0 {
                let offset = ki * dim;
                for j in 0..dim {
                    centroids[offset + j] = (sums[offset + j] / counts[ki] as f64) as f32;
                }
            }
        }
    }

    centroids
}

/// Sample k distinct points as the initial centroids.
fn random_init(points: &[f32], dim: usize, n: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(k);

    let mut centroids = vec![0.0f32; k * dim];
    for (ki, &idx) in indices.iter().enumerate() {
        centroids[ki * dim..(ki + 1) * dim].copy_from_slice(&points[idx * dim..(idx + 1) * dim]);
    }
    centroids
}

/// k-means++ seeding: each next centroid is sampled proportionally to its
/// squared distance from the nearest centroid chosen so far.
fn kmeans_plusplus_init(
    points: &[f32],
    dim: usize,
    n: usize,
    k: usize,
    rng: &mut StdRng,
) -> Vec<f32> {
    let mut centroids = vec![0.0f32; k * dim];

    let first_idx = rng.gen_range(0..n);
    centroids[..dim].copy_from_slice(&points[first_idx * dim..(first_idx + 1) * dim]);

    let mut min_distances: Vec<f32> = points
        .chunks_exact(dim)
        .map(|p| l2_distance_squared(p, &centroids[..dim]))
        .collect();

    for ki in 1..k {
        let total_dist: f64 = min_distances.iter().map(|&d| d as f64).sum();

        let offset = ki * dim;
        if total_dist == 0.0 {
            // All remaining points are duplicates of chosen centroids.
            let idx = rng.gen_range(0..n);
            centroids[offset..offset + dim].copy_from_slice(&points[idx * dim..(idx + 1) * dim]);
            continue;
        }

        let threshold = rng.gen::<f64>() * total_dist;
        let mut cumsum = 0.0;
        let mut chosen_idx = 0;
        for (i, &dist) in min_distances.iter().enumerate() {
            cumsum += dist as f64;
            if cumsum >= threshold {
                chosen_idx = i;
                break;
            }
        }

        centroids[offset..offset + dim]
            .copy_from_slice(&points[chosen_idx * dim..(chosen_idx + 1) * dim]);

        for (i, point) in points.chunks_exact(dim).enumerate() {
            let dist = l2_distance_squared(point, &centroids[offset..offset + dim]);
            if dist < min_distances[i] {
                min_distances[i] = dist;
            }
        }
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three well-separated 2-D clusters around (0,0), (10,10), (-10,10).
    fn clustered_points(per_cluster: usize, rng: &mut StdRng) -> Vec<f32> {
        let centers = [(0.0f32, 0.0f32), (10.0, 10.0), (-10.0, 10.0)];
        let mut points = Vec::with_capacity(per_cluster * centers.len() * 2);
        for &(cx, cy) in &centers {
            for _ in 0..per_cluster {
                points.push(cx + rng.gen_range(-0.5..0.5));
                points.push(cy + rng.gen_range(-0.5..0.5));
            }
        }
        points
    }

    #[test]
    fn test_recovers_separated_clusters() {
        let mut rng = StdRng::seed_from_u64(42);
        let points = clustered_points(50, &mut rng);

        let centroids = kmeans(&points, 2, 3, 15, CentroidInit::KmeansPlusPlus, &mut rng);
        assert_eq!(centroids.len(), 6);

        // Every true center should have a centroid within its cluster radius.
        for center in [[0.0f32, 0.0], [10.0, 10.0], [-10.0, 10.0]] {
            let nearest = centroids
                .chunks_exact(2)
                .map(|c| l2_distance_squared(c, &center))
                .fold(f32::MAX, f32::min);
            assert!(nearest < 1.0, "no centroid near {:?}: {}", center, nearest);
        }
    }

    #[test]
    fn test_deterministic_under_seed() {
        let mut rng = StdRng::seed_from_u64(1);
        let points = clustered_points(30, &mut rng);

        let a = kmeans(
            &points,
            2,
            4,
            10,
            CentroidInit::Random,
            &mut StdRng::seed_from_u64(9),
        );
        let b = kmeans(
            &points,
            2,
            4,
            10,
            CentroidInit::Random,
            &mut StdRng::seed_from_u64(9),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_points() {
        // 10 copies of the same point; k-means++ hits the zero-distance path.
        let points = vec![1.0f32; 20];
        let mut rng = StdRng::seed_from_u64(3);
        let centroids = kmeans(&points, 2, 2, 5, CentroidInit::KmeansPlusPlus, &mut rng);
        assert_eq!(centroids.len(), 4);
        for c in centroids.chunks_exact(2) {
            assert_eq!(c, &[1.0, 1.0]);
        }
    }
}
