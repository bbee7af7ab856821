//! Integration tests for the sde-mbo CLI pipeline.
//!
//! Each test writes a small Branin snapshot to a temp dir and drives the
//! train / eval / summary pipelines end to end on the NdArray backend.

use std::path::{Path, PathBuf};

use design_task::{
    BraninOracle, DatasetSnapshot, DesignBatch, DesignEvaluator, SnapshotReader, SnapshotWriter,
};
use diffusion::evaluation::{DESIGNS_FILE, LATEST_RUN, SCORES_FILE};
use diffusion::{LossKind, TemperatureRule};
use mbo_cli::config::{ConfigError, SamplingOverrides, TrainOverrides};
use mbo_cli::pipeline::{
    find_best_checkpoint, run_eval, run_summary, run_train, EvalArgs, RunArgs, SummaryArgs,
    TrainArgs, ARGS_FILE, METRICS_FILE, SUMMARY_FILE,
};

/// Helper: a 64-point Branin snapshot on a grid inside the box.
fn write_branin_dataset(dir: &Path) -> PathBuf {
    let rows: Vec<Vec<f32>> = (0..64)
        .map(|i| {
            let x1 = -5.0 + 15.0 * (i % 8) as f32 / 7.0;
            let x2 = 15.0 * (i / 8) as f32 / 7.0;
            vec![x1, x2]
        })
        .collect();
    let designs = DesignBatch::from_rows(&rows).unwrap();
    let scores = BraninOracle::new().evaluate(&designs).unwrap();
    let snapshot = DatasetSnapshot {
        designs,
        scores,
        vocab_size: None,
    };
    SnapshotWriter::write(&dir.join("data").join("branin.parquet"), &snapshot).unwrap()
}

/// Helper: a config with a small model and a short epoch budget.
fn write_config(dir: &Path, dataset: &Path) -> PathBuf {
    let path = dir.join("branin.toml");
    let contents = format!(
        r#"
[task]
name = "branin"
dataset = "{}"
validation_fraction = 0.25

[model]
hidden_dim = 16
num_hidden_layers = 2

[training]
batch_size = 16
max_epochs = 2
checkpoint_every_n_epochs = 1

[sampling]
num_samples = 8
num_steps = 10
guidance = [0.0, 2.0]
"#,
        dataset.display()
    );
    std::fs::write(&path, contents).unwrap();
    path
}

fn train_args(config: &Path, experiments: &Path, seed: Option<u64>) -> TrainArgs {
    TrainArgs {
        config: Some(config.to_path_buf()),
        experiments_dir: experiments.to_path_buf(),
        name: "smoke".to_string(),
        seed,
        overrides: TrainOverrides::default(),
    }
}

fn eval_args(experiments: &Path, seed: u64) -> EvalArgs {
    EvalArgs {
        config: None,
        experiments_dir: experiments.to_path_buf(),
        task: "branin".to_string(),
        name: "smoke".to_string(),
        seed,
        dataset: None,
        checkpoint: None,
        sampling: SamplingOverrides::default(),
        sampling_seed: None,
    }
}

#[test]
fn test_train_writes_experiment_layout() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dataset = write_branin_dataset(tmp.path());
    let config = write_config(tmp.path(), &dataset);
    let experiments = tmp.path().join("experiments");

    let run_dir = run_train(train_args(&config, &experiments, Some(7))).unwrap();
    assert_eq!(run_dir, experiments.join("branin").join("smoke").join("7"));

    let args: RunArgs =
        serde_json::from_reader(std::fs::File::open(run_dir.join(ARGS_FILE)).unwrap()).unwrap();
    assert_eq!(args.seed, 7);
    assert_eq!(args.model.design_dim, 2);
    assert_eq!(args.task.temperature, TemperatureRule::Fixed(0.1));
    assert_eq!(args.sampling.guidance, vec![0.0, 2.0]);

    let metrics = std::fs::read_to_string(run_dir.join(METRICS_FILE)).unwrap();
    assert_eq!(metrics.lines().count(), 2);
    let first: serde_json::Value = serde_json::from_str(metrics.lines().next().unwrap()).unwrap();
    assert!(first["val_loss"].is_number());

    let checkpoints = run_dir.join("checkpoints");
    assert!(checkpoints.join("last.mpk").exists());
    assert!(checkpoints.join("last.json").exists());
    // One periodic checkpoint per epoch.
    let periodic = std::fs::read_dir(&checkpoints)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.starts_with("branin_7--epoch=") && name.ends_with(".mpk")
        })
        .count();
    assert_eq!(periodic, 2);

    let best = find_best_checkpoint(&checkpoints).unwrap();
    assert!(best.exists());
    assert!(best.to_string_lossy().contains("val_loss="));
}

#[test]
fn test_train_eval_summary_end_to_end() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dataset = write_branin_dataset(tmp.path());
    let config = write_config(tmp.path(), &dataset);
    let experiments = tmp.path().join("experiments");

    run_train(train_args(&config, &experiments, Some(3))).unwrap();
    let result_dir = run_eval(eval_args(&experiments, 3)).unwrap();

    let run_id = result_dir.file_name().unwrap().to_string_lossy().to_string();
    assert!(run_id.starts_with("8_10_1_0-2_0_0.1_20_"), "{run_id}");
    assert!(result_dir.join(ARGS_FILE).exists());
    assert!(result_dir.join(SUMMARY_FILE).exists());

    let (designs, guidance) = SnapshotReader::read_designs(&result_dir.join(DESIGNS_FILE)).unwrap();
    let scores = SnapshotReader::read_scores(&result_dir.join(SCORES_FILE)).unwrap();
    assert_eq!(designs.len(), scores.len());
    assert_eq!(designs.len(), guidance.len());
    assert!(designs.len() <= 16);
    assert_eq!(designs.item_shape(), &[2]);

    // Persisted scores are oracle scores of the persisted native designs.
    let expected = BraninOracle::new().evaluate(&designs).unwrap();
    for (record, e) in scores.iter().zip(&expected) {
        assert!((record.score - e).abs() < 1e-2 * e.abs().max(1.0), "{} vs {e}", record.score);
    }

    let results_root = result_dir.parent().unwrap();
    let summary = run_summary(SummaryArgs {
        results: results_root.to_path_buf(),
        json: true,
    })
    .unwrap();
    assert_eq!(summary.overall.as_ref().unwrap().count, scores.len());
    assert_eq!(summary.per_guidance.len(), 2);

    #[cfg(unix)]
    assert_eq!(
        std::fs::read_link(results_root.join(LATEST_RUN)).unwrap(),
        PathBuf::from(&run_id)
    );
}

#[test]
fn test_repeated_eval_runs_do_not_collide() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dataset = write_branin_dataset(tmp.path());
    let config = write_config(tmp.path(), &dataset);
    let experiments = tmp.path().join("experiments");
    let run_dir = run_train(train_args(&config, &experiments, Some(1))).unwrap();

    let mut args = eval_args(&experiments, 1);
    args.checkpoint = Some(run_dir.join("checkpoints").join("last.mpk"));
    args.sampling = SamplingOverrides {
        num_samples: Some(4),
        num_steps: Some(5),
        condition: Some(0.5),
        guidance: Some(vec![1.0]),
        lambda: None,
    };
    let first = run_eval(args).unwrap();

    let mut args = eval_args(&experiments, 1);
    args.sampling.num_samples = Some(4);
    args.sampling.num_steps = Some(5);
    args.sampling.condition = Some(0.5);
    args.sampling.guidance = Some(vec![1.0]);
    let second = run_eval(args).unwrap();

    assert_ne!(first, second);
    assert!(first.join(SCORES_FILE).exists() && second.join(SCORES_FILE).exists());

    // A run directory can also be summarized directly.
    let summary = run_summary(SummaryArgs {
        results: first,
        json: false,
    })
    .unwrap();
    assert_eq!(summary.per_guidance[0].guidance, 1.0);

    // Probability-flow sampling is tagged in the run id.
    let mut args = eval_args(&experiments, 1);
    args.sampling.num_samples = Some(4);
    args.sampling.num_steps = Some(5);
    args.sampling.lambda = Some(1.0);
    let ode = run_eval(args).unwrap();
    let ode_id = ode.file_name().unwrap().to_string_lossy().to_string();
    assert!(ode_id.starts_with("4_5_1_0-2_1_0.1_20_"), "{ode_id}");

    let mut args = eval_args(&experiments, 1);
    args.sampling.lambda = Some(2.0);
    let err = run_eval(args).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidLambda(_))
    ));
}

#[test]
fn test_cli_overrides_reach_training() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dataset = write_branin_dataset(tmp.path());
    let config = write_config(tmp.path(), &dataset);
    let experiments = tmp.path().join("experiments");

    let mut args = train_args(&config, &experiments, Some(5));
    args.overrides = TrainOverrides {
        max_steps: Some(3),
        loss: Some(LossKind::ScoreMatching),
        validation_fraction: Some(0.0),
        ..Default::default()
    };
    let run_dir = run_train(args).unwrap();

    let args: RunArgs =
        serde_json::from_reader(std::fs::File::open(run_dir.join(ARGS_FILE)).unwrap()).unwrap();
    assert_eq!(args.model.loss, LossKind::ScoreMatching);
    assert_eq!(args.task.validation_fraction, 0.0);

    let metrics = std::fs::read_to_string(run_dir.join(METRICS_FILE)).unwrap();
    let last: serde_json::Value = serde_json::from_str(metrics.lines().last().unwrap()).unwrap();
    assert_eq!(last["step"], 3);
    assert!(last.get("val_loss").is_none());
}

#[test]
fn test_config_errors_fail_before_any_output() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dataset = write_branin_dataset(tmp.path());
    let experiments = tmp.path().join("experiments");

    // No duration bound.
    let config = tmp.path().join("no_budget.toml");
    let header = format!("[task]\nname = \"branin\"\ndataset = \"{}\"\n", dataset.display());
    std::fs::write(
        &config,
        format!("{header}[training]\ncheckpoint_every_n_epochs = 1\n"),
    )
    .unwrap();
    let err = run_train(train_args(&config, &experiments, Some(0))).unwrap_err();
    assert!(err.downcast_ref::<ConfigError>().is_some(), "{err}");
    assert!(!experiments.exists());

    // Zero temperature would make the best weight 0/0.
    let config = tmp.path().join("zero_temperature.toml");
    let training = "[training]\nmax_epochs = 1\ncheckpoint_every_n_epochs = 1\n";
    std::fs::write(&config, format!("{header}temperature = 0.0\n{training}")).unwrap();
    let err = run_train(train_args(&config, &experiments, Some(0))).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidTemperature(_))
    ));
    assert!(!experiments.exists());

    // Unknown task.
    let config = write_config(tmp.path(), &dataset);
    let mut args = train_args(&config, &experiments, Some(0));
    args.overrides.task = Some("superconductor".to_string());
    let err = run_train(args).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::UnknownTask(_))
    ));

    // Missing dataset is a load-time error.
    let mut args = train_args(&config, &experiments, Some(0));
    args.overrides.dataset = Some(tmp.path().join("missing.parquet"));
    assert!(run_train(args).is_err());
    assert!(!experiments.exists());
}

#[test]
fn test_eval_without_training_run_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    let result = run_eval(eval_args(tmp.path(), 99));
    assert!(result.is_err());
}
