//! Train, evaluate and summarize pipelines behind the CLI subcommands.
//!
//! Experiment layout:
//!
//! ```text
//! experiments/{task}/{name}/{seed}/
//!   args.json                 resolved settings of the training run
//!   metrics.jsonl             one line per epoch
//!   checkpoints/*.mpk|*.json  periodic, best and `last` checkpoints
//!   results/{run_id}/         designs.parquet, scores.parquet, summary.json
//!   results/latest-run        symlink to the newest run_id
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use design_task::{evaluator_for, SnapshotReader, Task};
use diffusion::evaluation::{LATEST_RUN, SCORES_FILE};
use diffusion::training::trainer::LAST_CHECKPOINT;
use diffusion::{
    generate_designs, load_checkpoint, persist_results, persist_sampled, run_identifier,
    split_dataset, train, CheckpointMeta, EvaluationError, JsonlLogger, MultiLogger,
    ScoreNetConfig, TracingLogger, TrainRun, TrainingConfig,
};

use crate::config::{
    load_experiment_toml, ConfigError, ExperimentToml, SamplingOverrides, SamplingSection,
    TaskSettings, TrainOverrides,
};
use crate::results::EvalSummary;

type TrainBackend = Autodiff<NdArray<f32>>;
type EvalBackend = NdArray<f32>;

pub const ARGS_FILE: &str = "args.json";
pub const METRICS_FILE: &str = "metrics.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Path to the experiment config TOML file.
    pub config: Option<PathBuf>,
    /// Root of the experiment tree.
    pub experiments_dir: PathBuf,
    /// Experiment name.
    pub name: String,
    /// Run seed; drawn at random when absent.
    pub seed: Option<u64>,
    pub overrides: TrainOverrides,
}

/// Arguments for the `eval` subcommand.
#[derive(Debug)]
pub struct EvalArgs {
    /// Sampling settings; the training run's settings are used when absent.
    pub config: Option<PathBuf>,
    pub experiments_dir: PathBuf,
    pub task: String,
    pub name: String,
    pub seed: u64,
    /// Replaces the dataset recorded at train time.
    pub dataset: Option<PathBuf>,
    /// Defaults to the best checkpoint of the run.
    pub checkpoint: Option<PathBuf>,
    pub sampling: SamplingOverrides,
    /// Seed for the sampler noise; defaults to the run seed.
    pub sampling_seed: Option<u64>,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    /// An evaluation run directory, or a results directory with a `latest-run` link.
    pub results: PathBuf,
    pub json: bool,
}

/// Settings recorded as `args.json` by a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArgs {
    pub name: String,
    pub seed: u64,
    pub task: TaskSettings,
    pub model: ScoreNetConfig,
    pub training: TrainingConfig,
    pub sampling: SamplingSection,
}

/// `experiments/{task}/{name}/{seed}`.
pub fn run_dir(experiments_dir: &Path, task: &str, name: &str, seed: u64) -> PathBuf {
    experiments_dir.join(task).join(name).join(seed.to_string())
}

/// Load a task and apply the configured preprocessing.
///
/// Discrete tasks are mapped to logits before any normalization.
pub fn prepare_task(settings: &TaskSettings) -> anyhow::Result<Task> {
    let evaluator = evaluator_for(&settings.name)
        .ok_or_else(|| ConfigError::UnknownTask(settings.name.clone()))?;
    let mut task = Task::load(settings.name.clone(), &settings.dataset, evaluator)?;
    if task.is_discrete() {
        task = task.map_to_logits()?;
    }
    if settings.normalize_x {
        task = task.map_normalize_x()?;
    }
    if settings.normalize_y {
        task = task.map_normalize_y()?;
    }
    Ok(task)
}

/// Train a score network and return the run directory.
pub fn run_train(args: TrainArgs) -> anyhow::Result<PathBuf> {
    let start = Instant::now();

    // 1. Resolve config before touching any data
    let mut toml = match &args.config {
        Some(path) => load_experiment_toml(path)?,
        None => ExperimentToml::default(),
    };
    toml.apply_train_overrides(&args.overrides);
    let resolved = toml.resolve_train()?;

    let seed = match args.seed {
        Some(seed) => seed,
        None => {
            let seed = rand::random::<u32>() as u64;
            tracing::info!(seed, "No seed given, drew one at random");
            seed
        }
    };

    // 2. Load and preprocess the task
    let task = prepare_task(&resolved.task)?;
    let model_config = toml.model_config(task.design_dim());

    // 3. Split
    let mut rng = StdRng::seed_from_u64(seed);
    let split = split_dataset(
        &task,
        resolved.task.validation_fraction,
        resolved.task.temperature,
        &mut rng,
    )?;

    // 4. Record the run
    let dir = run_dir(&args.experiments_dir, task.name(), &args.name, seed);
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", dir.display()))?;
    let run_args = RunArgs {
        name: args.name.clone(),
        seed,
        task: resolved.task.clone(),
        model: model_config.clone(),
        training: resolved.training.clone(),
        sampling: toml.sampling.clone(),
    };
    serde_json::to_writer_pretty(std::fs::File::create(dir.join(ARGS_FILE))?, &run_args)?;

    // 5. Train
    let mut logger = MultiLogger::new()
        .with(TracingLogger)
        .with(JsonlLogger::create(&dir.join(METRICS_FILE))?);
    let run = TrainRun {
        task: task.name().to_string(),
        seed,
        checkpoint_dir: dir.join("checkpoints"),
    };
    let device = Default::default();
    let outcome = train::<TrainBackend>(
        &resolved.training,
        &model_config,
        &split,
        &run,
        &mut logger,
        &mut rng,
        &device,
    )?;

    tracing::info!(
        run_dir = %dir.display(),
        epochs = outcome.history.len(),
        best = ?outcome.best_checkpoint,
        elapsed_secs = format!("{:.1}", start.elapsed().as_secs_f64()),
        "Training run finished"
    );
    Ok(dir)
}

/// Checkpoint with the lowest monitored value in `dir`, falling back to `last`.
pub fn find_best_checkpoint(dir: &Path) -> anyhow::Result<PathBuf> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("Failed to read checkpoint dir {}: {e}", dir.display()))?;

    let mut best: Option<(f64, PathBuf)> = None;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let stem = path.with_extension("");
        if stem.file_name().and_then(|s| s.to_str()) == Some(LAST_CHECKPOINT) {
            continue;
        }
        let meta: CheckpointMeta = match std::fs::File::open(&path)
            .map_err(anyhow::Error::from)
            .and_then(|f| serde_json::from_reader(f).map_err(anyhow::Error::from))
        {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable checkpoint metadata"
                );
                continue;
            }
        };
        if !meta.monitor_value.is_finite() {
            continue;
        }
        if best.as_ref().map_or(true, |(v, _)| meta.monitor_value < *v) {
            let model_path = PathBuf::from(format!("{}.mpk", stem.display()));
            best = Some((meta.monitor_value, model_path));
        }
    }

    match best {
        Some((_, path)) => Ok(path),
        None => {
            let last = dir.join(format!("{LAST_CHECKPOINT}.mpk"));
            if last.exists() {
                Ok(last)
            } else {
                anyhow::bail!("no checkpoints found in {}", dir.display())
            }
        }
    }
}

/// Sample and score designs from a trained run; returns the result directory.
pub fn run_eval(args: EvalArgs) -> anyhow::Result<PathBuf> {
    let start = Instant::now();
    let dir = run_dir(&args.experiments_dir, &args.task, &args.name, args.seed);
    let args_path = dir.join(ARGS_FILE);
    let run_args: RunArgs = serde_json::from_reader(
        std::fs::File::open(&args_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", args_path.display()))?,
    )?;

    // 1. Sampling settings: training run < TOML < CLI
    let mut toml = match &args.config {
        Some(path) => load_experiment_toml(path)?,
        None => ExperimentToml {
            sampling: run_args.sampling.clone(),
            ..Default::default()
        },
    };
    toml.apply_sampling_overrides(&args.sampling);
    let eval_config = toml.evaluation_config()?;

    // 2. Task with the training-time preprocessing
    let mut settings = run_args.task.clone();
    if let Some(dataset) = &args.dataset {
        settings.dataset = dataset.clone();
    }
    let task = prepare_task(&settings)?;

    // 3. Model
    let checkpoint = match &args.checkpoint {
        Some(path) => path.clone(),
        None => find_best_checkpoint(&dir.join("checkpoints"))?,
    };
    let device = Default::default();
    let (model, meta) = load_checkpoint::<EvalBackend>(&checkpoint, &device)?;
    if meta.model.design_dim != task.design_dim() {
        anyhow::bail!(
            "checkpoint {} expects {} features but task {} has {}",
            checkpoint.display(),
            meta.model.design_dim,
            task.name(),
            task.design_dim()
        );
    }

    // 4. Sample, score and persist
    let run_id = run_identifier(&eval_config, &meta.model.sde.init());
    let results_root = dir.join("results");
    let attachment = args.config.clone().unwrap_or(args_path);
    let attachments = [attachment.as_path()];

    let mut rng = StdRng::seed_from_u64(args.sampling_seed.unwrap_or(args.seed));
    let output = match generate_designs(&model, &task, &device, &eval_config, &mut rng) {
        Ok(output) => output,
        Err(EvaluationError::Scoring { sampled, cause }) => {
            let kept = persist_sampled(&results_root, &run_id, &sampled, &attachments)?;
            return Err(cause.context(format!(
                "scoring failed; {} sampled designs kept in {}",
                sampled.len(),
                kept.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    let result_dir = persist_results(&results_root, &run_id, &output, &attachments)?;

    let summary = EvalSummary::from_records(&output.scores, output.dropped());
    serde_json::to_writer_pretty(
        std::fs::File::create(result_dir.join(SUMMARY_FILE))?,
        &summary,
    )?;

    tracing::info!(
        checkpoint = %checkpoint.display(),
        results = %result_dir.display(),
        best = ?summary.overall.as_ref().map(|s| s.max),
        elapsed_secs = format!("{:.1}", start.elapsed().as_secs_f64()),
        "Evaluation finished"
    );
    Ok(result_dir)
}

/// Resolve a run directory from either a run directory or a results root.
fn resolve_results_dir(path: &Path) -> PathBuf {
    if path.join(SCORES_FILE).exists() {
        path.to_path_buf()
    } else {
        path.join(LATEST_RUN)
    }
}

/// Summarize the scores of an evaluation run.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<EvalSummary> {
    let dir = resolve_results_dir(&args.results);
    let records = SnapshotReader::read_scores(&dir.join(SCORES_FILE))?;

    let dropped = std::fs::File::open(dir.join(SUMMARY_FILE))
        .ok()
        .and_then(|f| serde_json::from_reader::<_, EvalSummary>(f).ok())
        .map_or(0, |s| s.dropped);
    let summary = EvalSummary::from_records(&records, dropped);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Results: {}", dir.display());
        print!("{}", summary.render());
    }
    Ok(summary)
}
