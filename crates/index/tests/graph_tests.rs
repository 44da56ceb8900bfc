//! End-to-end tests for the flat graph index.

use flatgraph_core::Metric;
use flatgraph_index::{FlatGraph, GraphConfig, ReorderAlgorithm};
use flatgraph_pq::{PqParams, ProductQuantizer};
use rand::prelude::*;
use std::collections::{BTreeSet, HashMap};
use tempfile::tempdir;

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

/// Vectors drawn from well-separated clusters; quantizes cleanly.
fn clustered_vectors(num_clusters: usize, per_cluster: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut vectors = Vec::with_capacity(num_clusters * per_cluster);
    for _ in 0..num_clusters {
        let center: Vec<f32> = (0..dim).map(|_| rng.gen_range(-10.0..10.0)).collect();
        for _ in 0..per_cluster {
            vectors.push(center.iter().map(|&c| c + rng.gen_range(-0.5..0.5)).collect());
        }
    }
    vectors
}

fn build_graph(vectors: &[Vec<f32>], m: usize, ef_construction: usize) -> FlatGraph {
    let dim = vectors[0].len();
    let mut graph = FlatGraph::new(dim, GraphConfig::new(vectors.len(), m)).unwrap();
    for (label, v) in vectors.iter().enumerate() {
        assert!(graph.add(v, label as u64, ef_construction).unwrap());
    }
    graph
}

/// The logical edge set as (label, label) pairs, self-loops excluded.
fn edge_labels(graph: &FlatGraph) -> BTreeSet<(u64, u64)> {
    let mut edges = BTreeSet::new();
    for id in 0..graph.len() as u32 {
        for neighbor in graph.neighbors(id) {
            edges.insert((graph.label(id), graph.label(neighbor)));
        }
    }
    edges
}

#[test]
fn test_tiny_l2_exact_results() {
    // Five points whose top-3 for the query is known in closed form.
    let points: [[f32; 2]; 5] = [
        [0.0, 0.0],   // A
        [1.0, 0.0],   // B
        [0.0, 1.0],   // C
        [10.0, 10.0], // D
        [-1.0, 0.0],  // E
    ];

    let mut graph = FlatGraph::new(2, GraphConfig::new(5, 4)).unwrap();
    for (label, p) in points.iter().enumerate() {
        assert!(graph.add(p, label as u64, 8).unwrap());
    }

    let results = graph.search(&[0.1, 0.0], 3, 8).unwrap();
    assert_eq!(results.len(), 3);

    let labels: Vec<u64> = results.iter().map(|r| r.label).collect();
    assert_eq!(labels, vec![0, 1, 2]); // A, B, C

    let expected = [0.01f32, 0.81, 1.01];
    for (r, &want) in results.iter().zip(expected.iter()) {
        assert!(
            (r.distance - want).abs() < 1e-6,
            "distance {} != {}",
            r.distance,
            want
        );
    }
}

#[test]
fn test_capacity_reported_structurally() {
    let vectors = random_vectors(4, 3, 5);
    let mut graph = FlatGraph::new(3, GraphConfig::new(3, 2)).unwrap();

    assert!(graph.add(&vectors[0], 0, 8).unwrap());
    assert!(graph.add(&vectors[1], 1, 8).unwrap());
    assert!(graph.add(&vectors[2], 2, 8).unwrap());
    assert!(!graph.add(&vectors[3], 3, 8).unwrap());
    assert_eq!(graph.len(), 3);
}

#[test]
fn test_first_insert_contract() {
    let mut graph = FlatGraph::new(2, GraphConfig::new(4, 3)).unwrap();

    // The first insert succeeds; the node is live with no forward edges.
    assert!(graph.add(&[0.5, 0.5], 99, 8).unwrap());
    assert_eq!(graph.len(), 1);
    assert_eq!(graph.label(0), 99);
    assert_eq!(graph.link_slots(0), &[0, 0, 0]);
    assert_eq!(graph.neighbors(0).count(), 0);

    // And it is immediately searchable.
    let results = graph.search(&[0.4, 0.4], 1, 4).unwrap();
    assert_eq!(results[0].label, 99);
}

#[test]
fn test_link_well_formedness_and_degree_cap() {
    let vectors = random_vectors(200, 8, 17);
    let graph = build_graph(&vectors, 6, 40);

    let len = graph.len() as u32;
    for id in 0..len {
        let slots = graph.link_slots(id);
        assert_eq!(slots.len(), 6);

        // Every slot is a valid id or the self-loop sentinel.
        for &slot in slots {
            assert!(slot < len, "node {} links to unallocated {}", id, slot);
        }

        // No duplicates among real neighbors.
        let mut nbrs: Vec<u32> = graph.neighbors(id).collect();
        nbrs.sort_unstable();
        let before = nbrs.len();
        nbrs.dedup();
        assert_eq!(nbrs.len(), before, "node {} has duplicate links", id);
    }
}

#[test]
fn test_reorder_identity_is_noop() {
    let vectors = random_vectors(80, 4, 23);
    let mut graph = build_graph(&vectors, 4, 24);

    let links_before: Vec<Vec<u32>> = (0..graph.len() as u32)
        .map(|id| graph.link_slots(id).to_vec())
        .collect();
    let labels_before: Vec<u64> = (0..graph.len() as u32).map(|id| graph.label(id)).collect();
    let vectors_before: Vec<Vec<f32>> = (0..graph.len() as u32)
        .map(|id| graph.vector(id).unwrap().to_vec())
        .collect();

    let identity: Vec<u32> = (0..graph.len() as u32).collect();
    graph.apply_permutation(&identity).unwrap();

    for id in 0..graph.len() as u32 {
        assert_eq!(graph.link_slots(id), &links_before[id as usize][..]);
        assert_eq!(graph.label(id), labels_before[id as usize]);
        assert_eq!(graph.vector(id).unwrap(), &vectors_before[id as usize][..]);
    }
}

#[test]
fn test_apply_permutation_rejects_non_bijection() {
    let vectors = random_vectors(10, 4, 2);
    let mut graph = build_graph(&vectors, 4, 16);

    assert!(graph.apply_permutation(&[0, 1]).is_err()); // wrong length
    let mut dup: Vec<u32> = (0..10).collect();
    dup[3] = 4; // 4 appears twice
    assert!(graph.apply_permutation(&dup).is_err());
    let mut oob: Vec<u32> = (0..10).collect();
    oob[0] = 10;
    assert!(graph.apply_permutation(&oob).is_err());
}

#[test]
fn test_reorder_preserves_graph_isomorphism() {
    let vectors = random_vectors(150, 8, 31);

    for algorithm in [
        ReorderAlgorithm::Rcm,
        ReorderAlgorithm::Gorder { window_size: 5 },
    ] {
        let mut graph = build_graph(&vectors, 6, 40);
        let edges_before = edge_labels(&graph);

        // Payloads keyed by label survive relocation.
        let mut payloads_before: HashMap<u64, Vec<f32>> = HashMap::new();
        for id in 0..graph.len() as u32 {
            payloads_before.insert(graph.label(id), graph.vector(id).unwrap().to_vec());
        }

        graph.reorder(algorithm).unwrap();

        assert_eq!(edges_before, edge_labels(&graph), "{:?}", algorithm);
        for id in 0..graph.len() as u32 {
            assert_eq!(
                graph.vector(id).unwrap(),
                &payloads_before[&graph.label(id)][..],
                "{:?}",
                algorithm
            );
        }
    }
}

#[test]
fn test_reorder_commutes_with_search() {
    let vectors = random_vectors(300, 16, 47);
    let queries = random_vectors(50, 16, 48);

    // Probe every node during entry selection so the entry point is the
    // same logical node before and after relocation.
    let dim = 16;
    let config = GraphConfig::new(vectors.len(), 8).with_num_initializations(vectors.len());
    let mut graph = FlatGraph::new(dim, config).unwrap();
    for (label, v) in vectors.iter().enumerate() {
        graph.add(v, label as u64, 60).unwrap();
    }

    let before: Vec<BTreeSet<u64>> = queries
        .iter()
        .map(|q| {
            graph
                .search(q, 10, 50)
                .unwrap()
                .into_iter()
                .map(|r| r.label)
                .collect()
        })
        .collect();

    graph.reorder(ReorderAlgorithm::Rcm).unwrap();

    for (q, want) in queries.iter().zip(before.iter()) {
        let got: BTreeSet<u64> = graph
            .search(q, 10, 50)
            .unwrap()
            .into_iter()
            .map(|r| r.label)
            .collect();
        assert_eq!(&got, want);
    }
}

#[test]
fn test_persistence_round_trip_exact() {
    let vectors = random_vectors(120, 12, 53);
    let graph = build_graph(&vectors, 8, 50);

    let dir = tempdir().unwrap();
    let path = dir.path().join("exact.idx");
    graph.save(&path).unwrap();

    let mut restored = FlatGraph::load(&path).unwrap();
    assert_eq!(restored.len(), graph.len());
    assert_eq!(restored.capacity(), graph.capacity());
    assert_eq!(restored.max_degree(), graph.max_degree());
    assert_eq!(restored.metric(), graph.metric());
    assert!(!restored.is_quantized());

    let mut original = graph;
    for q in random_vectors(20, 12, 54) {
        let a = original.search(&q, 5, 30).unwrap();
        let b = restored.search(&q, 5, 30).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.label, y.label);
            assert_eq!(x.distance.to_bits(), y.distance.to_bits());
        }
    }
}

#[test]
fn test_persistence_round_trip_quantized() {
    let vectors = clustered_vectors(12, 60, 16, 61);
    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();

    let params = PqParams::new(4, 6).with_train_iterations(10).with_seed(5);
    let mut pq = ProductQuantizer::new(16, Metric::L2, params).unwrap();
    pq.train(&flat, vectors.len()).unwrap();

    let config = GraphConfig::new(vectors.len(), 8);
    let mut graph = FlatGraph::with_quantizer(16, config, pq).unwrap();
    for (label, v) in vectors.iter().enumerate() {
        assert!(graph.add(v, label as u64, 40).unwrap());
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("quantized.idx");
    graph.save(&path).unwrap();

    let mut restored = FlatGraph::load(&path).unwrap();
    assert!(restored.is_quantized());
    assert_eq!(restored.len(), graph.len());

    for q in vectors.iter().take(20) {
        let a = graph.search(q, 5, 30).unwrap();
        let b = restored.search(q, 5, 30).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.label, y.label);
            assert_eq!(x.distance.to_bits(), y.distance.to_bits());
        }
    }
}

#[test]
fn test_quantized_recall_against_exact() {
    let vectors = clustered_vectors(15, 80, 32, 71);
    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();

    let params = PqParams::new(8, 6).with_train_iterations(12).with_seed(9);
    let mut pq = ProductQuantizer::new(32, Metric::L2, params).unwrap();
    pq.train(&flat, vectors.len()).unwrap();

    let mut exact = build_graph(&vectors, 12, 80);
    let mut quantized =
        FlatGraph::with_quantizer(32, GraphConfig::new(vectors.len(), 12), pq).unwrap();
    for (label, v) in vectors.iter().enumerate() {
        assert!(quantized.add(v, label as u64, 80).unwrap());
    }

    let queries: Vec<Vec<f32>> = vectors.iter().step_by(27).take(40).cloned().collect();
    let k = 10;
    let mut total_recall = 0.0;

    for q in &queries {
        let exact_top: BTreeSet<u64> = exact
            .search(q, k, 60)
            .unwrap()
            .into_iter()
            .map(|r| r.label)
            .collect();
        let pq_top: Vec<u64> = quantized
            .search(q, k, 60)
            .unwrap()
            .into_iter()
            .map(|r| r.label)
            .collect();

        let hits = pq_top.iter().filter(|l| exact_top.contains(l)).count();
        total_recall += hits as f64 / k as f64;
    }

    let avg_recall = total_recall / queries.len() as f64;
    assert!(avg_recall >= 0.5, "PQ recall too low: {:.2}", avg_recall);
}

#[test]
fn test_quantizer_must_be_trained_and_compatible() {
    let pq = ProductQuantizer::new(16, Metric::L2, PqParams::new(4, 4)).unwrap();
    let config = GraphConfig::new(10, 4);
    assert!(FlatGraph::with_quantizer(16, config.clone(), pq).is_err());

    // Trained but on a different dimension.
    let vectors = clustered_vectors(6, 40, 8, 3);
    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
    let params = PqParams::new(4, 4).with_train_iterations(5).with_seed(1);
    let mut pq8 = ProductQuantizer::new(8, Metric::L2, params.clone()).unwrap();
    pq8.train(&flat, vectors.len()).unwrap();
    assert!(FlatGraph::with_quantizer(16, config.clone(), pq8).is_err());

    // Trained but with a different metric.
    let mut pq_ip = ProductQuantizer::new(8, Metric::InnerProduct, params).unwrap();
    pq_ip.train(&flat, vectors.len()).unwrap();
    assert!(FlatGraph::with_quantizer(8, config, pq_ip).is_err());
}

#[test]
fn test_quantized_insert_capacity() {
    let vectors = clustered_vectors(5, 40, 8, 19);
    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
    let params = PqParams::new(4, 4).with_train_iterations(5).with_seed(2);
    let mut pq = ProductQuantizer::new(8, Metric::L2, params).unwrap();
    pq.train(&flat, vectors.len()).unwrap();

    let mut graph = FlatGraph::with_quantizer(8, GraphConfig::new(3, 4), pq).unwrap();
    assert!(graph.add(&vectors[0], 0, 8).unwrap());
    assert!(graph.add(&vectors[1], 1, 8).unwrap());
    assert!(graph.add(&vectors[2], 2, 8).unwrap());
    assert!(!graph.add(&vectors[3], 3, 8).unwrap());
    assert_eq!(graph.len(), 3);
}

#[test]
fn test_reorder_quantized_index() {
    let vectors = clustered_vectors(8, 40, 16, 29);
    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
    let params = PqParams::new(4, 5).with_train_iterations(8).with_seed(4);
    let mut pq = ProductQuantizer::new(16, Metric::L2, params).unwrap();
    pq.train(&flat, vectors.len()).unwrap();

    let mut graph =
        FlatGraph::with_quantizer(16, GraphConfig::new(vectors.len(), 6), pq).unwrap();
    for (label, v) in vectors.iter().enumerate() {
        graph.add(v, label as u64, 40).unwrap();
    }

    let edges_before = edge_labels(&graph);
    let mut codes_before: HashMap<u64, Vec<u8>> = HashMap::new();
    for id in 0..graph.len() as u32 {
        codes_before.insert(graph.label(id), graph.code(id).unwrap().to_vec());
    }

    graph.reorder(ReorderAlgorithm::Gorder { window_size: 4 }).unwrap();

    assert_eq!(edges_before, edge_labels(&graph));
    for id in 0..graph.len() as u32 {
        assert_eq!(graph.code(id).unwrap(), &codes_before[&graph.label(id)][..]);
    }
}
