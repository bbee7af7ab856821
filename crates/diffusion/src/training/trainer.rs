//! Score-network training loop.
//!
//! Ties together the weighted batch source, the denoising loss and the metric
//! sinks into an AdamW loop, with epoch/step/wall-clock budgets and periodic,
//! best and last checkpoints.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::model::bridge::{batch_to_tensor, column_tensor, tensor_to_f64};
use crate::model::score_net::{ScoreNet, ScoreNetConfig};
use crate::training::data::{BatchSource, DatasetSplit, WeightedBatch, WeightedDataset};
use crate::training::loss::{denoising_loss, DenoisingNoise};
use crate::training::metrics::{EpochMetrics, MetricLogger};

/// Stem of the checkpoint written after every epoch.
pub const LAST_CHECKPOINT: &str = "last";

/// Seed for the validation noise, fixed so epochs are comparable.
const VALIDATION_SEED: u64 = 0x5eed;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScheduleError {
    #[error("no training duration given (set one of max_epochs, max_steps, train_time)")]
    MissingBudget,

    #[error("ambiguous training duration: {0:?} are all set")]
    AmbiguousBudget(Vec<&'static str>),

    #[error("no checkpoint frequency given (set one of checkpoint_every_n_epochs, checkpoint_every_n_steps, checkpoint_time_interval)")]
    MissingCheckpointFrequency,

    #[error("ambiguous checkpoint frequency: {0:?} are all set")]
    AmbiguousCheckpointFrequency(Vec<&'static str>),

    #[error("{0} must be positive")]
    NotPositive(&'static str),
}

/// When training stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainBudget {
    Epochs(usize),
    Steps(usize),
    /// Seconds of wall-clock time.
    WallClock(u64),
}

impl TrainBudget {
    /// Build from optional settings; exactly one must be present.
    pub fn from_parts(
        epochs: Option<usize>,
        steps: Option<usize>,
        wall_clock_secs: Option<u64>,
    ) -> Result<Self, ScheduleError> {
        let set: Vec<&'static str> = [
            epochs.map(|_| "max_epochs"),
            steps.map(|_| "max_steps"),
            wall_clock_secs.map(|_| "train_time"),
        ]
        .into_iter()
        .flatten()
        .collect();
        if set.len() > 1 {
            return Err(ScheduleError::AmbiguousBudget(set));
        }
        let budget = match (epochs, steps, wall_clock_secs) {
            (Some(n), _, _) => Self::Epochs(n),
            (_, Some(n), _) => Self::Steps(n),
            (_, _, Some(s)) => Self::WallClock(s),
            _ => return Err(ScheduleError::MissingBudget),
        };
        let positive = match budget {
            Self::Epochs(n) | Self::Steps(n) => n > 0,
            Self::WallClock(s) => s > 0,
        };
        if !positive {
            return Err(ScheduleError::NotPositive(set[0]));
        }
        Ok(budget)
    }

    /// Total optimizer steps, when known up front.
    pub fn total_steps(&self, steps_per_epoch: usize) -> Option<usize> {
        match *self {
            Self::Epochs(n) => Some(n * steps_per_epoch),
            Self::Steps(n) => Some(n),
            Self::WallClock(_) => None,
        }
    }

    fn exhausted(&self, epoch: usize, step: usize, elapsed_secs: f64) -> bool {
        match *self {
            Self::Epochs(n) => epoch >= n,
            Self::Steps(n) => step >= n,
            Self::WallClock(s) => elapsed_secs >= s as f64,
        }
    }
}

/// How often periodic checkpoints are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSchedule {
    EveryEpochs(usize),
    EverySteps(usize),
    /// Seconds of wall-clock time between checkpoints.
    Interval(u64),
}

impl CheckpointSchedule {
    /// Build from optional settings; exactly one must be present.
    pub fn from_parts(
        every_epochs: Option<usize>,
        every_steps: Option<usize>,
        interval_secs: Option<u64>,
    ) -> Result<Self, ScheduleError> {
        let set: Vec<&'static str> = [
            every_epochs.map(|_| "checkpoint_every_n_epochs"),
            every_steps.map(|_| "checkpoint_every_n_steps"),
            interval_secs.map(|_| "checkpoint_time_interval"),
        ]
        .into_iter()
        .flatten()
        .collect();
        if set.len() > 1 {
            return Err(ScheduleError::AmbiguousCheckpointFrequency(set));
        }
        let schedule = match (every_epochs, every_steps, interval_secs) {
            (Some(n), _, _) => Self::EveryEpochs(n),
            (_, Some(n), _) => Self::EverySteps(n),
            (_, _, Some(s)) => Self::Interval(s),
            _ => return Err(ScheduleError::MissingCheckpointFrequency),
        };
        let positive = match schedule {
            Self::EveryEpochs(n) | Self::EverySteps(n) => n > 0,
            Self::Interval(s) => s > 0,
        };
        if !positive {
            return Err(ScheduleError::NotPositive(set[0]));
        }
        Ok(schedule)
    }

    /// Whether a periodic checkpoint is due at the end of `epoch` (0-based).
    fn due(
        &self,
        epoch: usize,
        steps_before: usize,
        steps_after: usize,
        secs_since_last: f64,
    ) -> bool {
        match *self {
            Self::EveryEpochs(n) => (epoch + 1) % n == 0,
            Self::EverySteps(n) => steps_after / n > steps_before / n,
            Self::Interval(s) => secs_since_last >= s as f64,
        }
    }
}

/// Configuration for score-network training.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub budget: TrainBudget,
    pub checkpoint: CheckpointSchedule,
    #[config(default = 64)]
    pub batch_size: usize,
    /// Base learning rate for AdamW.
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 0.0)]
    pub weight_decay: f64,
    /// Maximum gradient norm for clipping.
    #[config(default = 1.0)]
    pub max_grad_norm: f64,
    /// Linear warmup steps.
    #[config(default = 0)]
    pub warmup_steps: usize,
    /// Cosine-decay the learning rate when the total step count is known.
    #[config(default = false)]
    pub cosine_decay: bool,
    /// Lower bound of the sampled diffusion time.
    #[config(default = 1e-3)]
    pub t_min: f64,
    /// Probability of replacing an example's condition with the null condition.
    #[config(default = 0.1)]
    pub cond_drop_prob: f64,
    /// Validation batch size.
    #[config(default = 256)]
    pub eval_batch_size: usize,
}

/// Compute the learning rate at a given step using warmup + cosine decay.
///
/// - Warmup phase (`step < warmup_steps`): linearly ramps from 0 to `base_lr`.
/// - Cosine phase: decays from `base_lr` to 0 following a cosine schedule.
pub fn lr_schedule(base_lr: f64, warmup_steps: usize, total_steps: usize, step: usize) -> f64 {
    if warmup_steps > 0 && step < warmup_steps {
        base_lr * (step + 1) as f64 / warmup_steps as f64
    } else {
        let decay_steps = total_steps.saturating_sub(warmup_steps).max(1);
        let progress = (step.saturating_sub(warmup_steps)) as f64 / decay_steps as f64;
        let progress = progress.min(1.0);
        base_lr * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos())
    }
}

fn learning_rate(config: &TrainingConfig, total_steps: Option<usize>, step: usize) -> f64 {
    match total_steps {
        Some(total) if config.cosine_decay => {
            lr_schedule(config.lr, config.warmup_steps, total, step)
        }
        _ if step < config.warmup_steps => {
            config.lr * (step + 1) as f64 / config.warmup_steps as f64
        }
        _ => config.lr,
    }
}

/// Identifies the run a set of checkpoints belongs to.
#[derive(Debug, Clone)]
pub struct TrainRun {
    pub task: String,
    pub seed: u64,
    pub checkpoint_dir: PathBuf,
}

/// Metadata saved as `<stem>.json` next to each `<stem>.mpk`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CheckpointMeta {
    pub task: String,
    pub seed: u64,
    pub epoch: usize,
    pub step: usize,
    pub monitor: String,
    pub monitor_value: f64,
    /// Everything needed to rebuild the network.
    pub model: ScoreNetConfig,
}

/// File stem for a periodic or best checkpoint.
///
/// `{task}_{seed}--epoch={epoch:03}-{monitor}={value:.4e}`
pub fn checkpoint_stem(task: &str, seed: u64, epoch: usize, monitor: &str, value: f64) -> String {
    format!("{task}_{seed}--epoch={epoch:03}-{monitor}={value:.4e}")
}

/// `(<dir>/<stem>.mpk, <dir>/<stem>.json)`.
///
/// The extension is spelled out because stems contain dots.
pub fn checkpoint_paths(dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{stem}.mpk")),
        dir.join(format!("{stem}.json")),
    )
}

fn save_checkpoint<B: Backend>(
    model: &ScoreNet<B>,
    dir: &Path,
    stem: &str,
    meta: &CheckpointMeta,
) -> anyhow::Result<PathBuf> {
    let (model_path, meta_path) = checkpoint_paths(dir, stem);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(model_path.clone(), &recorder)
        .map_err(|e| anyhow::anyhow!("Failed to save checkpoint {}: {e}", model_path.display()))?;
    serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, meta)?;
    Ok(model_path)
}

fn remove_checkpoint(path: &Path) {
    let stem = path.to_string_lossy();
    let stem = stem.strip_suffix(".mpk").unwrap_or(&stem);
    for file in [format!("{stem}.mpk"), format!("{stem}.json")] {
        if let Err(e) = std::fs::remove_file(&file) {
            tracing::warn!(file = %file, error = %e, "Failed to remove stale checkpoint");
        }
    }
}

/// Load a network from `<stem>.mpk` (or the stem itself) and its metadata.
///
/// The architecture comes from the sibling `<stem>.json`.
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> anyhow::Result<(ScoreNet<B>, CheckpointMeta)> {
    let raw = path.to_string_lossy();
    let stem = raw.strip_suffix(".mpk").unwrap_or(&raw);
    let model_path = PathBuf::from(format!("{stem}.mpk"));
    let meta_path = PathBuf::from(format!("{stem}.json"));

    let meta: CheckpointMeta = serde_json::from_reader(
        std::fs::File::open(&meta_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", meta_path.display()))?,
    )
    .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", meta_path.display()))?;

    let model = meta
        .model
        .init::<B>(device)
        .load_file(
            model_path.clone(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| {
            anyhow::anyhow!("Failed to load checkpoint from {}: {e}", model_path.display())
        })?;

    tracing::info!(
        path = %model_path.display(),
        epoch = meta.epoch,
        step = meta.step,
        "Loaded checkpoint"
    );
    Ok((model, meta))
}

/// What a finished training run produced.
pub struct TrainOutcome<B: AutodiffBackend> {
    pub model: ScoreNet<B>,
    pub history: Vec<EpochMetrics>,
    pub best_checkpoint: Option<PathBuf>,
    pub last_checkpoint: PathBuf,
    pub periodic_checkpoints: Vec<PathBuf>,
}

/// Running mean of the per-step loss over an epoch.
struct RunningAvg {
    total: f64,
    count: usize,
}

impl RunningAvg {
    fn new() -> Self {
        Self { total: 0.0, count: 0 }
    }

    fn update(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.total / self.count as f64
        }
    }
}

fn batch_tensors<B: Backend>(
    batch: &WeightedBatch,
    device: &B::Device,
) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>) {
    (
        batch_to_tensor::<B>(&batch.designs, device),
        column_tensor::<B>(&batch.scores, device),
        column_tensor::<B>(&batch.weights, device),
    )
}

/// Mean weighted denoising loss over a dataset, without gradients.
pub fn evaluate_loss<B: Backend>(
    model: &ScoreNet<B>,
    dataset: &WeightedDataset,
    config: &TrainingConfig,
    rng: &mut impl Rng,
    device: &B::Device,
) -> f64 {
    let horizon = model.sde().horizon;
    let mut total = 0.0;
    for batch in BatchSource::new(dataset, config.eval_batch_size, false).epoch(rng) {
        let (x0, y, w) = batch_tensors::<B>(&batch, device);
        let noise = DenoisingNoise::sample(
            rng,
            batch.len(),
            dataset.design_dim(),
            config.t_min,
            horizon,
            config.cond_drop_prob,
        );
        let loss = tensor_to_f64(denoising_loss(model, x0, y, w, &noise));
        total += loss * batch.len() as f64;
    }
    total / dataset.len().max(1) as f64
}

/// Run the training loop.
///
/// Builds a fresh network from `model_config`, trains it on `split.train`
/// and monitors `split.validation` when it is non-empty. Checkpoints go to
/// `run.checkpoint_dir`. All randomness comes from `rng`.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    model_config: &ScoreNetConfig,
    split: &DatasetSplit,
    run: &TrainRun,
    logger: &mut dyn MetricLogger,
    rng: &mut StdRng,
    device: &B::Device,
) -> anyhow::Result<TrainOutcome<B>> {
    if split.train.design_dim() != model_config.design_dim {
        anyhow::bail!(
            "model expects {} features but the dataset has {}",
            model_config.design_dim,
            split.train.design_dim()
        );
    }
    if !(0.0..=1.0).contains(&config.cond_drop_prob) {
        anyhow::bail!("cond_drop_prob must be in [0, 1], got {}", config.cond_drop_prob);
    }
    if !(config.t_min >= 0.0 && config.t_min < model_config.sde.horizon) {
        anyhow::bail!(
            "t_min must be in [0, {}), got {}",
            model_config.sde.horizon,
            config.t_min
        );
    }
    std::fs::create_dir_all(&run.checkpoint_dir)?;

    let mut model = model_config.init::<B>(device);
    let optim_config = AdamWConfig::new()
        .with_weight_decay(config.weight_decay as f32)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(
            config.max_grad_norm as f32,
        )));
    let mut optimizer = optim_config.init();

    let source = BatchSource::new(&split.train, config.batch_size, true);
    let steps_per_epoch = source.num_batches();
    let total_steps = config.budget.total_steps(steps_per_epoch);
    let horizon = model_config.sde.horizon;
    let design_dim = model_config.design_dim;

    tracing::info!(
        task = %run.task,
        seed = run.seed,
        loss = %model_config.loss,
        train = split.train.len(),
        validation = split.validation.len(),
        steps_per_epoch,
        budget = ?config.budget,
        checkpoint = ?config.checkpoint,
        "Starting training"
    );

    let pb = match total_steps {
        Some(total) => ProgressBar::new(total as u64),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let train_start = Instant::now();
    let mut last_periodic = Instant::now();
    let mut history = Vec::new();
    let mut periodic_checkpoints = Vec::new();
    let mut best: Option<(f64, PathBuf)> = None;
    let mut step = 0usize;
    let mut epoch = 0usize;
    let mut last_checkpoint = None;

    while !config
        .budget
        .exhausted(epoch, step, train_start.elapsed().as_secs_f64())
    {
        let steps_before = step;
        let mut running = RunningAvg::new();
        let mut lr = learning_rate(config, total_steps, step);

        for batch in source.epoch(rng) {
            lr = learning_rate(config, total_steps, step);
            let (x0, y, w) = batch_tensors::<B>(&batch, device);
            let noise = DenoisingNoise::sample(
                rng,
                batch.len(),
                design_dim,
                config.t_min,
                horizon,
                config.cond_drop_prob,
            );

            let loss = denoising_loss(&model, x0, y, w, &noise);
            let loss_val = tensor_to_f64(loss.clone());
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);

            running.update(loss_val);
            step += 1;
            pb.inc(1);

            let stop_mid_epoch = match config.budget {
                TrainBudget::Steps(n) => step >= n,
                TrainBudget::WallClock(s) => train_start.elapsed().as_secs_f64() >= s as f64,
                TrainBudget::Epochs(_) => false,
            };
            if stop_mid_epoch {
                break;
            }
        }

        let val_loss = if split.has_validation() {
            let mut val_rng = StdRng::seed_from_u64(VALIDATION_SEED);
            let valid_model = model.valid();
            Some(evaluate_loss(
                &valid_model,
                &split.validation,
                config,
                &mut val_rng,
                device,
            ))
        } else {
            None
        };

        let metrics = EpochMetrics {
            epoch,
            step,
            train_loss: running.mean(),
            val_loss,
            lr,
            elapsed_secs: train_start.elapsed().as_secs_f64(),
        };
        logger.log_metrics(step, &metrics.as_pairs())?;
        for warning in metrics.health_check() {
            tracing::warn!(epoch, step, "Health check: {warning}");
        }
        pb.set_message(format!(
            "epoch {epoch} loss={:.4}{}",
            metrics.train_loss,
            val_loss.map(|v| format!(" val={v:.4}")).unwrap_or_default()
        ));

        let (monitor, value) = metrics.monitor();
        let meta = CheckpointMeta {
            task: run.task.clone(),
            seed: run.seed,
            epoch,
            step,
            monitor: monitor.to_string(),
            monitor_value: value,
            model: model_config.clone(),
        };
        let stem = checkpoint_stem(&run.task, run.seed, epoch, monitor, value);

        let periodic_due = config.checkpoint.due(
            epoch,
            steps_before,
            step,
            last_periodic.elapsed().as_secs_f64(),
        );
        if periodic_due {
            let path = save_checkpoint(&model, &run.checkpoint_dir, &stem, &meta)?;
            tracing::info!(epoch, step, path = %path.display(), "Periodic checkpoint saved");
            periodic_checkpoints.push(path);
            last_periodic = Instant::now();
        }

        let improved = value.is_finite() && best.as_ref().map_or(true, |(b, _)| value < *b);
        if improved {
            let (path, _) = checkpoint_paths(&run.checkpoint_dir, &stem);
            if !periodic_due {
                save_checkpoint(&model, &run.checkpoint_dir, &stem, &meta)?;
            }
            if let Some((_, previous)) = best.take() {
                if !periodic_checkpoints.contains(&previous) {
                    remove_checkpoint(&previous);
                }
            }
            tracing::debug!(epoch, monitor, value, "New best checkpoint");
            best = Some((value, path));
        }

        last_checkpoint = Some(save_checkpoint(
            &model,
            &run.checkpoint_dir,
            LAST_CHECKPOINT,
            &meta,
        )?);

        history.push(metrics);
        epoch += 1;
    }
    pb.finish_with_message("done");

    let last_checkpoint = match last_checkpoint {
        Some(path) => path,
        None => anyhow::bail!("training budget allowed no epochs"),
    };

    tracing::info!(
        epochs = epoch,
        steps = step,
        elapsed_secs = format!("{:.1}", train_start.elapsed().as_secs_f64()),
        best = ?best.as_ref().map(|(v, _)| *v),
        "Training complete"
    );

    Ok(TrainOutcome {
        model,
        history,
        best_checkpoint: best.map(|(_, path)| path),
        last_checkpoint,
        periodic_checkpoints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lr_schedule() {
        let base_lr = 1e-4;
        let warmup = 100;
        let total = 1000;

        // Warmup phase: step 0 → lr = base_lr * 1/100
        let lr0 = lr_schedule(base_lr, warmup, total, 0);
        assert!((lr0 - base_lr / 100.0).abs() < 1e-10, "Step 0: got {lr0}");

        // Peak at warmup boundary
        let lr99 = lr_schedule(base_lr, warmup, total, 99);
        assert!((lr99 - base_lr).abs() < 1e-10, "Step 99: got {lr99}");

        // Cosine midpoint: step 550 → progress = 450/900 = 0.5
        let lr550 = lr_schedule(base_lr, warmup, total, 550);
        assert!((lr550 - base_lr * 0.5).abs() < 1e-10, "Step 550: got {lr550}");

        // Near end
        let lr999 = lr_schedule(base_lr, warmup, total, 999);
        assert!(lr999 < base_lr * 0.01, "Step 999: got {lr999}");

        // No warmup, straight cosine
        let lr_no_warmup = lr_schedule(base_lr, 0, 1000, 0);
        assert!((lr_no_warmup - base_lr).abs() < 1e-10);
    }

    fn config(budget: TrainBudget) -> TrainingConfig {
        TrainingConfig::new(budget, CheckpointSchedule::EveryEpochs(1))
    }

    #[test]
    fn test_learning_rate_without_total() {
        let cfg = config(TrainBudget::WallClock(10))
            .with_cosine_decay(true)
            .with_warmup_steps(4);
        // Warmup still applies; no decay without a known total.
        assert!((learning_rate(&cfg, None, 1) - cfg.lr * 0.5).abs() < 1e-12);
        assert_eq!(learning_rate(&cfg, None, 1000), cfg.lr);
        assert!(learning_rate(&cfg, Some(100), 99) < cfg.lr * 0.01);

        let constant = config(TrainBudget::Epochs(1));
        assert_eq!(learning_rate(&constant, Some(100), 50), constant.lr);
    }

    #[test]
    fn test_budget_requires_exactly_one() {
        assert_eq!(
            TrainBudget::from_parts(None, None, None),
            Err(ScheduleError::MissingBudget)
        );
        assert_eq!(
            TrainBudget::from_parts(Some(3), None, Some(60)),
            Err(ScheduleError::AmbiguousBudget(vec!["max_epochs", "train_time"]))
        );
        assert_eq!(
            TrainBudget::from_parts(None, Some(0), None),
            Err(ScheduleError::NotPositive("max_steps"))
        );
        assert_eq!(
            TrainBudget::from_parts(None, Some(500), None),
            Ok(TrainBudget::Steps(500))
        );
        assert_eq!(TrainBudget::Epochs(3).total_steps(10), Some(30));
        assert_eq!(TrainBudget::WallClock(60).total_steps(10), None);
    }

    #[test]
    fn test_checkpoint_schedule_requires_exactly_one() {
        assert_eq!(
            CheckpointSchedule::from_parts(None, None, None),
            Err(ScheduleError::MissingCheckpointFrequency)
        );
        assert!(matches!(
            CheckpointSchedule::from_parts(Some(1), Some(100), None),
            Err(ScheduleError::AmbiguousCheckpointFrequency(_))
        ));
        assert_eq!(
            CheckpointSchedule::from_parts(None, None, Some(3600)),
            Ok(CheckpointSchedule::Interval(3600))
        );
    }

    #[test]
    fn test_checkpoint_due() {
        let every_two = CheckpointSchedule::EveryEpochs(2);
        assert!(!every_two.due(0, 0, 10, 0.0));
        assert!(every_two.due(1, 10, 20, 0.0));

        let every_25 = CheckpointSchedule::EverySteps(25);
        assert!(!every_25.due(0, 0, 20, 0.0));
        assert!(every_25.due(1, 20, 40, 0.0));
        assert!(!every_25.due(2, 40, 49, 0.0));

        let hourly = CheckpointSchedule::Interval(3600);
        assert!(!hourly.due(0, 0, 10, 10.0));
        assert!(hourly.due(0, 0, 10, 3600.0));
    }

    #[test]
    fn test_checkpoint_stem() {
        assert_eq!(
            checkpoint_stem("branin", 42, 7, "val_loss", 0.125),
            "branin_42--epoch=007-val_loss=1.2500e-1"
        );
        let stem = "branin_1--epoch=000-train_loss=5.0000e-1";
        let (mpk, json) = checkpoint_paths(Path::new("ckpt"), stem);
        assert_eq!(mpk, Path::new("ckpt/branin_1--epoch=000-train_loss=5.0000e-1.mpk"));
        assert_eq!(json, Path::new("ckpt/branin_1--epoch=000-train_loss=5.0000e-1.json"));
    }
}
