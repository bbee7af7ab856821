//! Integration tests for the diffusion crate.
//!
//! These tests exercise cross-module flows: task normalization + weighted
//! split, the sampler against stub models, a short training run with
//! checkpoints, and the evaluation pipeline down to Parquet artifacts.
//! All use the NdArray backend and synthetic data.

use std::path::Path;
use std::sync::Arc;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use design_task::{
    BraninOracle, DatasetSnapshot, DesignBatch, DesignEvaluator, SnapshotReader, Task,
};
use diffusion::evaluation::{DESIGNS_FILE, LATEST_RUN, SCORES_FILE};
use diffusion::mocks::{ConstantScoreModel, LinearOracle, PoisonedRowsModel};
use diffusion::model::bridge::{constant_column, tensor_to_batch, values_to_tensor};
use diffusion::{
    euler_maruyama, generate_designs, get_weights, load_checkpoint, persist_results,
    persist_sampled, run_identifier, split_dataset, train, CheckpointSchedule, EvaluationConfig,
    EvaluationError, JsonlLogger, LossKind, SamplerConfig, ScoreNetConfig, TemperatureRule,
    TrainBudget, TrainRun, TrainingConfig,
};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<NdArray<f32>>;

/// Oracle that is never reachable.
struct OfflineOracle;

impl DesignEvaluator for OfflineOracle {
    fn name(&self) -> &str {
        "offline"
    }

    fn bounds(&self) -> Option<&[(f32, f32)]> {
        None
    }

    fn evaluate(&self, _designs: &DesignBatch) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("oracle down")
    }
}

/// Helper: N two-dimensional designs with a known per-coordinate mean.
fn gaussian_task(n: usize, seed: u64, evaluator: Arc<dyn DesignEvaluator>) -> Task {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = diffusion::draw_standard_normal(&mut rng, n * 2);
    let rows: Vec<Vec<f32>> = noise
        .chunks(2)
        .map(|c| vec![3.0 + 2.0 * c[0], -1.0 + 0.5 * c[1]])
        .collect();
    let scores = rows.iter().map(|r| r[0] + r[1]).collect();
    let snapshot = DatasetSnapshot {
        designs: DesignBatch::from_rows(&rows).unwrap(),
        scores,
        vocab_size: None,
    };
    Task::from_snapshot("gaussian", snapshot, evaluator).unwrap()
}

/// Helper: token sequences of length 3 over a vocabulary of 4.
fn token_task(n: usize) -> Task {
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|i| vec![(i % 4) as f32, ((i / 4) % 4) as f32, ((i * 7) % 4) as f32])
        .collect();
    let scores = rows.iter().map(|r| r.iter().sum()).collect();
    let snapshot = DatasetSnapshot {
        designs: DesignBatch::from_rows(&rows).unwrap(),
        scores,
        vocab_size: Some(4),
    };
    Task::from_snapshot("tokens", snapshot, Arc::new(LinearOracle)).unwrap()
}

fn column_means(batch: &DesignBatch) -> Vec<f64> {
    let d = batch.row_len();
    let mut sums = vec![0.0f64; d];
    for row in batch.rows() {
        for (s, &v) in sums.iter_mut().zip(row) {
            *s += v as f64;
        }
    }
    sums.into_iter().map(|s| s / batch.len() as f64).collect()
}

// ---------------------------------------------------------------------------
// Task + split
// ---------------------------------------------------------------------------

#[test]
fn test_normalize_split_denormalize_recovers_mean() {
    let task = gaussian_task(100, 7, Arc::new(LinearOracle));
    let raw_mean = column_means(task.designs());

    let task = task.map_normalize_x().unwrap().map_normalize_y().unwrap();
    let split = split_dataset(
        &task,
        0.2,
        TemperatureRule::default(),
        &mut StdRng::seed_from_u64(3),
    )
    .unwrap();
    assert_eq!(split.train.len(), 80);
    assert_eq!(split.validation.len(), 20);

    let mut all = task.denormalize_x(split.train.designs());
    all.extend(&task.denormalize_x(split.validation.designs()))
        .unwrap();
    let recovered = column_means(&all);
    for (r, m) in recovered.iter().zip(&raw_mean) {
        assert!((r - m).abs() < 1e-4, "recovered {r}, expected {m}");
    }

    // The train subset on its own stays close to the population mean.
    let train_mean = column_means(&task.denormalize_x(split.train.designs()));
    assert!((train_mean[0] - raw_mean[0]).abs() < 1.0);
}

#[test]
fn test_split_is_disjoint_and_covering() {
    let task = gaussian_task(57, 1, Arc::new(LinearOracle));
    for frac in [0.0, 0.1, 0.5, 0.9] {
        let split = split_dataset(
            &task,
            frac,
            TemperatureRule::Fixed(0.1),
            &mut StdRng::seed_from_u64(11),
        )
        .unwrap();
        assert_eq!(split.train.len() + split.validation.len(), 57);
        assert_eq!(split.has_validation(), frac > 0.0);

        let mut seen = split.permutation.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..57).collect::<Vec<_>>());

        // Each example carries its own task score.
        for (k, &i) in split.permutation.iter().enumerate().take(split.train.len()) {
            assert_eq!(split.train.scores()[k], task.scores()[i]);
        }
    }
}

#[test]
fn test_split_weights_follow_global_max() {
    let task = gaussian_task(40, 5, Arc::new(LinearOracle));
    let split = split_dataset(
        &task,
        0.25,
        TemperatureRule::Fixed(0.1),
        &mut StdRng::seed_from_u64(2),
    )
    .unwrap();

    let mut scores = split.train.scores().to_vec();
    scores.extend_from_slice(split.validation.scores());
    let expected = get_weights(&scores, 0.1);
    let mut weights = split.train.weights().to_vec();
    weights.extend_from_slice(split.validation.weights());
    for (w, e) in weights.iter().zip(&expected) {
        assert!((w - e).abs() < 1e-6);
    }
    let max = weights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    assert!((max - 1.0).abs() < 1e-6);
}

#[test]
fn test_discrete_split_uses_logits() {
    let task = token_task(32);
    let split = split_dataset(
        &task,
        0.25,
        TemperatureRule::ScaledByLength(1.0),
        &mut StdRng::seed_from_u64(9),
    )
    .unwrap();
    // 3 tokens over a vocabulary of 4 -> 3 * (4 - 1) logit features.
    assert_eq!(split.train.design_dim(), 9);
    assert_eq!(split.train.len(), 24);
    assert!((split.temperature - 32.0).abs() < 1e-9);

    // Rows follow the permutation after the logits mapping.
    let logits = task.logits_designs().unwrap();
    for (k, &i) in split.permutation.iter().enumerate().take(4) {
        assert_eq!(split.train.designs().row(k), logits.row(i));
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

#[test]
fn test_random_walk_variance() {
    let device = Default::default();
    let model = ConstantScoreModel::new(0.0, 1.0);
    let (n, d, steps) = (8, 64, 50);
    let x0 = Tensor::<TestBackend, 2>::zeros([n, d], &device);
    let targets = constant_column::<TestBackend>(0.0, n, &device);
    let config = SamplerConfig::new(steps, 0.0);

    let states =
        euler_maruyama(&model, x0, targets, &config, &mut StdRng::seed_from_u64(42)).unwrap();
    assert_eq!(states.len(), 1);
    let out = tensor_to_batch(states.into_iter().next().unwrap()).unwrap();

    // A pure random walk over [0, 1] has variance num_steps * delta = 1.
    let values = out.values();
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64;
    let var = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    assert!((var - 1.0).abs() < 0.25, "variance {var}");
    assert!(mean.abs() < 0.25, "mean {mean}");
}

#[test]
fn test_trajectory_is_reproducible_from_seed() {
    let device = Default::default();
    let model = ConstantScoreModel::new(0.5, 0.3).with_horizon(2.0);
    let run = |seed: u64| {
        let mut rng = StdRng::seed_from_u64(seed);
        let x0 = values_to_tensor::<TestBackend>(
            diffusion::draw_standard_normal(&mut rng, 12),
            4,
            3,
            &device,
        );
        let targets = constant_column::<TestBackend>(1.0, 4, &device);
        let config = SamplerConfig::new(10, 1.0).with_keep_all_samples(true);
        euler_maruyama(&model, x0, targets, &config, &mut rng)
            .unwrap()
            .into_iter()
            .map(|s| tensor_to_batch(s).unwrap().into_values())
            .collect::<Vec<_>>()
    };
    let a = run(5);
    assert_eq!(a.len(), 10);
    assert_eq!(a, run(5));
    assert_ne!(a, run(6));
}

#[test]
fn test_probability_flow_ignores_noise_seed() {
    let device = Default::default();
    let model = ScoreNetConfig::new(3)
        .with_hidden_dim(16)
        .with_num_hidden_layers(2)
        .init::<TestBackend>(&device);
    let x0 = diffusion::draw_standard_normal(&mut StdRng::seed_from_u64(0), 12);
    let run = |lambda: f64, seed: u64| {
        let initial = values_to_tensor::<TestBackend>(x0.clone(), 4, 3, &device);
        let targets = constant_column::<TestBackend>(1.0, 4, &device);
        let config = SamplerConfig::new(20, 2.0).with_lambda(lambda);
        let mut rng = StdRng::seed_from_u64(seed);
        let states = euler_maruyama(&model, initial, targets, &config, &mut rng).unwrap();
        tensor_to_batch(states.into_iter().next().unwrap())
            .unwrap()
            .into_values()
    };

    // λ = 1 follows the ODE: same start, same end, whatever the noise seed.
    let ode = run(1.0, 1);
    assert_eq!(ode, run(1.0, 2));
    assert!(ode.iter().all(|v| v.is_finite()));
    assert_ne!(run(0.0, 1), run(0.0, 2));
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

#[test]
fn test_short_training_run_writes_checkpoints() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let task = gaussian_task(48, 13, Arc::new(LinearOracle))
        .map_normalize_x()
        .unwrap()
        .map_normalize_y()
        .unwrap();
    let mut rng = StdRng::seed_from_u64(13);
    let split = split_dataset(&task, 0.25, TemperatureRule::default(), &mut rng).unwrap();

    let config =
        TrainingConfig::new(TrainBudget::Epochs(3), CheckpointSchedule::EveryEpochs(2))
            .with_batch_size(16);
    let model_config = ScoreNetConfig::new(2)
        .with_hidden_dim(16)
        .with_num_hidden_layers(2)
        .with_loss(LossKind::ScoreMatching);
    let run = TrainRun {
        task: "gaussian".to_string(),
        seed: 13,
        checkpoint_dir: tmp.path().join("checkpoints"),
    };
    let metrics_path = tmp.path().join("metrics.jsonl");
    let mut logger = JsonlLogger::create(&metrics_path).unwrap();

    let outcome = train::<TestAutodiffBackend>(
        &config,
        &model_config,
        &split,
        &run,
        &mut logger,
        &mut rng,
        &device,
    )
    .unwrap();

    assert_eq!(outcome.history.len(), 3);
    assert!(outcome.history.iter().all(|m| m.val_loss.is_some()));
    assert_eq!(outcome.history.last().unwrap().step, 9);
    assert_eq!(outcome.periodic_checkpoints.len(), 1);
    assert!(outcome.periodic_checkpoints[0].exists());
    assert!(outcome.last_checkpoint.exists());
    let best = outcome.best_checkpoint.expect("finite losses give a best checkpoint");
    assert!(best.exists());
    assert!(best
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("gaussian_13--epoch="));

    let lines = std::fs::read_to_string(&metrics_path).unwrap();
    assert_eq!(lines.lines().count(), 3);

    let (restored, meta) =
        load_checkpoint::<TestBackend>(&outcome.last_checkpoint, &device).unwrap();
    assert_eq!(meta.epoch, 2);
    assert_eq!(meta.seed, 13);
    assert_eq!(meta.model.design_dim, 2);
    assert_eq!(restored.loss_kind(), LossKind::ScoreMatching);
}

#[test]
fn test_step_budget_without_validation() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let task = gaussian_task(20, 4, Arc::new(LinearOracle));
    let mut rng = StdRng::seed_from_u64(4);
    let split = split_dataset(&task, 0.0, TemperatureRule::default(), &mut rng).unwrap();

    let config = TrainingConfig::new(TrainBudget::Steps(5), CheckpointSchedule::EverySteps(100))
        .with_batch_size(8);
    let model_config = ScoreNetConfig::new(2).with_hidden_dim(8).with_num_hidden_layers(1);
    let run = TrainRun {
        task: "gaussian".to_string(),
        seed: 4,
        checkpoint_dir: tmp.path().to_path_buf(),
    };
    let mut logger = diffusion::TracingLogger;

    let outcome = train::<TestAutodiffBackend>(
        &config,
        &model_config,
        &split,
        &run,
        &mut logger,
        &mut rng,
        &device,
    )
    .unwrap();

    // 3 batches per epoch: epochs end at steps 3 and 5.
    assert_eq!(outcome.history.len(), 2);
    assert_eq!(outcome.history.last().unwrap().step, 5);
    assert!(outcome.history.iter().all(|m| m.val_loss.is_none()));
    assert!(outcome.periodic_checkpoints.is_empty());
    assert!(outcome
        .best_checkpoint
        .unwrap()
        .to_string_lossy()
        .contains("train_loss="));
}

#[test]
fn test_train_rejects_dimension_mismatch() {
    let tmp = TempDir::new().unwrap();
    let task = gaussian_task(10, 0, Arc::new(LinearOracle));
    let mut rng = StdRng::seed_from_u64(0);
    let split = split_dataset(&task, 0.0, TemperatureRule::default(), &mut rng).unwrap();
    let config = TrainingConfig::new(TrainBudget::Epochs(1), CheckpointSchedule::EveryEpochs(1));
    let run = TrainRun {
        task: "gaussian".to_string(),
        seed: 0,
        checkpoint_dir: tmp.path().to_path_buf(),
    };
    let result = train::<TestAutodiffBackend>(
        &config,
        &ScoreNetConfig::new(5),
        &split,
        &run,
        &mut diffusion::TracingLogger,
        &mut rng,
        &Default::default(),
    );
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[test]
fn test_generate_designs_drops_non_finite_rows() {
    let device = Default::default();
    let task = gaussian_task(30, 2, Arc::new(LinearOracle))
        .map_normalize_x()
        .unwrap()
        .map_normalize_y()
        .unwrap();
    let model = PoisonedRowsModel { rows: vec![1, 4] };
    let config = EvaluationConfig::new()
        .with_num_samples(6)
        .with_num_steps(5)
        .with_guidance(vec![0.0, 2.0]);

    let output = generate_designs::<TestBackend, _>(
        &model,
        &task,
        &device,
        &config,
        &mut StdRng::seed_from_u64(8),
    )
    .unwrap();

    assert_eq!(output.dropped(), 4);
    assert_eq!(output.designs.len(), 8);
    assert_eq!(output.scores.len(), 8);
    assert_eq!(output.design_guidance.len(), 8);
    assert!((0..output.designs.len()).all(|i| output.designs.is_row_finite(i)));
    assert_eq!(output.sweep[0].kept, 4);
    assert_eq!(output.sweep[1].guidance, 2.0);

    // Scores are on the oracle's own scale: the sum of native coordinates.
    for (row, record) in output.designs.rows().zip(&output.scores) {
        let expected: f32 = row.iter().sum();
        assert!((record.score - expected).abs() < 1e-3);
    }
}

#[test]
fn test_generate_designs_clips_to_oracle_bounds() {
    let device = Default::default();
    let task = gaussian_task(30, 6, Arc::new(BraninOracle::new()));
    // A large constant drift pushes every sample far outside the box.
    let model = ConstantScoreModel::new(1000.0, 0.0);
    let config = EvaluationConfig::new().with_num_samples(4).with_num_steps(2);

    let output = generate_designs::<TestBackend, _>(
        &model,
        &task,
        &device,
        &config,
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();

    let oracle = BraninOracle::new();
    let bounds = oracle.bounds().unwrap();
    let corner: Vec<Vec<f32>> = vec![bounds.iter().map(|&(_, hi)| hi).collect()];
    let expected = oracle
        .evaluate(&DesignBatch::from_rows(&corner).unwrap())
        .unwrap()[0];
    for record in &output.scores {
        assert!((record.score - expected).abs() < 1e-3);
    }
}

#[test]
fn test_discrete_designs_are_token_shaped() {
    let device = Default::default();
    let task = token_task(16).map_to_logits().unwrap();
    let model = ConstantScoreModel::new(0.0, 1.0);
    let config = EvaluationConfig::new().with_num_samples(5).with_num_steps(3);

    let output = generate_designs::<TestBackend, _>(
        &model,
        &task,
        &device,
        &config,
        &mut StdRng::seed_from_u64(1),
    )
    .unwrap();
    assert_eq!(output.designs.shape(), &[5, 3, 3]);
    assert_eq!(output.scores.len(), 5);
}

#[test]
fn test_persist_results_round_trip() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let task = gaussian_task(20, 3, Arc::new(LinearOracle));
    let config = EvaluationConfig::new()
        .with_num_samples(4)
        .with_num_steps(3)
        .with_guidance(vec![1.0, 3.0]);
    let output = generate_designs::<TestBackend, _>(
        &ConstantScoreModel::new(0.0, 1.0),
        &task,
        &device,
        &config,
        &mut StdRng::seed_from_u64(2),
    )
    .unwrap();

    let attachment = tmp.path().join("branin.toml");
    std::fs::write(&attachment, "[task]\nname = \"branin\"\n").unwrap();

    let results = tmp.path().join("results");
    let sde = ScoreNetConfig::new(2).sde.init();
    let run_id = run_identifier(&config, &sde);
    let run_dir = persist_results(&results, &run_id, &output, &[attachment.as_path()]).unwrap();

    let (designs, guidance) = SnapshotReader::read_designs(&run_dir.join(DESIGNS_FILE)).unwrap();
    assert_eq!(designs, output.designs);
    assert_eq!(guidance, output.design_guidance);
    let scores = SnapshotReader::read_scores(&run_dir.join(SCORES_FILE)).unwrap();
    assert_eq!(scores, output.scores);
    assert!(run_dir.join("branin.toml").exists());

    #[cfg(unix)]
    assert_eq!(
        std::fs::read_link(results.join(LATEST_RUN)).unwrap(),
        Path::new(&run_id)
    );

    // A second run of the same checkpoint lands in a fresh directory.
    let second_id = run_identifier(&config, &sde);
    assert_ne!(second_id, run_id);
    let second_dir = persist_results(&results, &second_id, &output, &[]).unwrap();
    assert!(run_dir.exists() && second_dir.exists());
}

#[test]
fn test_failing_oracle_keeps_sampled_designs() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let task = gaussian_task(20, 4, Arc::new(OfflineOracle))
        .map_normalize_x()
        .unwrap();
    let config = EvaluationConfig::new()
        .with_num_samples(5)
        .with_num_steps(3)
        .with_guidance(vec![0.0, 1.0]);

    let err = generate_designs::<TestBackend, _>(
        &ConstantScoreModel::new(0.0, 1.0),
        &task,
        &device,
        &config,
        &mut StdRng::seed_from_u64(3),
    )
    .unwrap_err();
    assert!(err.to_string().contains("oracle down"), "{err}");
    let sampled = match err {
        EvaluationError::Scoring { sampled, .. } => sampled,
        other => panic!("expected a scoring error, got {other}"),
    };
    assert_eq!(sampled.len(), 10);
    assert_eq!(sampled.design_guidance[5..], [1.0; 5]);
    assert_eq!(sampled.dropped(), 0);

    let results = tmp.path().join("results");
    let run_id = run_identifier(&config, &ScoreNetConfig::new(2).sde.init());
    let run_dir = persist_sampled(&results, &run_id, &sampled, &[]).unwrap();

    let (designs, guidance) = SnapshotReader::read_designs(&run_dir.join(DESIGNS_FILE)).unwrap();
    assert_eq!(designs, sampled.designs);
    assert_eq!(guidance, sampled.design_guidance);
    assert!(!run_dir.join(SCORES_FILE).exists());
    #[cfg(unix)]
    assert_eq!(
        std::fs::read_link(results.join(LATEST_RUN)).unwrap(),
        Path::new(&run_id)
    );
}
