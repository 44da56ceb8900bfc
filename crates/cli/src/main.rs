//! flatgraph CLI tools.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flatgraph_core::Metric;
use flatgraph_index::{FlatGraph, GraphConfig};
use flatgraph_pq::{PqParams, ProductQuantizer};
use ndarray::Array2;
use ndarray_npy::ReadNpyExt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "flatgraph")]
#[command(about = "flatgraph ANN index tools")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build an index from a NumPy dataset and save it to a file
    Construct {
        /// 0 = store raw vectors, 1 = product-quantize payloads
        quantize: u8,

        /// 0 = squared L2, 1 = inner product (angular)
        metric: u8,

        /// NumPy .npy file (shape [N, dim], dtype float32)
        dataset: PathBuf,

        /// Maximum out-degree per node (M)
        m: usize,

        /// Beam width during construction
        ef_construction: usize,

        /// Where to write the index
        outfile: PathBuf,

        /// Number of PQ subvectors (must divide the dataset dimension)
        #[arg(long, default_value_t = 8)]
        pq_subvectors: usize,

        /// Bits per PQ subvector code
        #[arg(long, default_value_t = 8)]
        pq_bits: u32,

        /// Seed for PQ training
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Construct {
            quantize,
            metric,
            dataset,
            m,
            ef_construction,
            outfile,
            pq_subvectors,
            pq_bits,
            seed,
        } => construct(
            quantize,
            metric,
            &dataset,
            m,
            ef_construction,
            &outfile,
            pq_subvectors,
            pq_bits,
            seed,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn construct(
    quantize: u8,
    metric: u8,
    dataset: &PathBuf,
    m: usize,
    ef_construction: usize,
    outfile: &PathBuf,
    pq_subvectors: usize,
    pq_bits: u32,
    seed: Option<u64>,
) -> Result<()> {
    let quantize = match quantize {
        0 => false,
        1 => true,
        other => bail!("<quantize> must be 0 or 1, got {}", other),
    };
    let metric = match metric {
        0 => Metric::L2,
        1 => Metric::InnerProduct,
        other => bail!("<metric> must be 0 (l2) or 1 (inner product), got {}", other),
    };

    let embeddings = load_npy_dataset(dataset)
        .with_context(|| format!("failed to load dataset from {}", dataset.display()))?;
    let (n, dim) = embeddings.dim();
    if n == 0 || dim == 0 {
        bail!("dataset is empty: shape [{}, {}]", n, dim);
    }
    info!(n, dim, %metric, "loaded dataset");

    let standard = embeddings.as_standard_layout();
    let flat = standard
        .as_slice()
        .context("dataset rows are not contiguous")?;

    let config = GraphConfig::new(n, m);
    let mut index = if quantize {
        let mut params = PqParams::new(pq_subvectors, pq_bits);
        if let Some(seed) = seed {
            params = params.with_seed(seed);
        }
        let mut quantizer = ProductQuantizer::new(dim, metric, params)
            .context("invalid quantizer parameters for this dataset")?;

        let start = Instant::now();
        quantizer
            .train(flat, n)
            .context("quantizer training failed")?;
        info!(elapsed = ?start.elapsed(), "trained product quantizer");

        FlatGraph::with_quantizer(dim, config.with_metric(metric), quantizer)?
    } else {
        FlatGraph::new(dim, config.with_metric(metric))?
    };

    let start = Instant::now();
    for label in 0..n {
        let vector = &flat[label * dim..(label + 1) * dim];
        if !index.add(vector, label as u64, ef_construction)? {
            bail!("index reported full at {} of {} inserts", label, n);
        }
        if label > 0 && label % 10_000 == 0 {
            info!(inserted = label, total = n, "building index");
        }
    }
    let elapsed = start.elapsed();
    info!(
        ?elapsed,
        per_insert_us = elapsed.as_micros() as f64 / n as f64,
        "built index"
    );

    index
        .save(outfile)
        .with_context(|| format!("failed to save index to {}", outfile.display()))?;
    info!(outfile = %outfile.display(), "saved index");

    Ok(())
}

/// Load a 2-D float32 array from a NumPy .npy file.
fn load_npy_dataset(path: &PathBuf) -> Result<Array2<f32>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let arr = Array2::<f32>::read_npy(reader)
        .context("dataset must be a 2-D float32 .npy array")?;
    Ok(arr)
}
