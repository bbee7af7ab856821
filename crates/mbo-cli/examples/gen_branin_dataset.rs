//! Generate a synthetic Branin dataset snapshot for local runs.
//!
//! Designs are drawn from a Gaussian centred in the Branin box and scored with
//! the Branin oracle.
//!
//! Usage: cargo run -p mbo-cli --example gen_branin_dataset -- data/branin_gaussian_5k.parquet [N] [SEED]

use design_task::{BraninOracle, DatasetSnapshot, DesignBatch, DesignEvaluator, SnapshotWriter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let output = args
        .next()
        .unwrap_or_else(|| "data/branin_gaussian_5k.parquet".to_string());
    let n: usize = args.next().map(|s| s.parse()).transpose()?.unwrap_or(5000);
    let seed: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(0);

    let mut rng = StdRng::seed_from_u64(seed);
    let x1 = Normal::new(2.5f32, 2.5)?;
    let x2 = Normal::new(7.5f32, 2.5)?;
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|_| vec![x1.sample(&mut rng), x2.sample(&mut rng)])
        .collect();

    let designs = DesignBatch::from_rows(&rows)?;
    let scores = BraninOracle::new().evaluate(&designs)?;
    let best = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let snapshot = DatasetSnapshot {
        designs,
        scores,
        vocab_size: None,
    };

    let path = SnapshotWriter::write(std::path::Path::new(&output), &snapshot)?;
    println!("Wrote Branin snapshot to: {}", path.display());
    println!("  Designs:     {n}");
    println!("  Best score:  {best:.4}");
    Ok(())
}
