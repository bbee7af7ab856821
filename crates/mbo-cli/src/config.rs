//! TOML experiment config for the CLI.
//!
//! Deserializes files like `configs/branin.toml`, which have `[task]`,
//! `[model]`, `[training]` and `[sampling]` sections, then merges CLI
//! overrides on top. Priority chain: built-in defaults < TOML < CLI flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use diffusion::{
    CheckpointSchedule, EvaluationConfig, LossKind, ScheduleError, ScoreNetConfig,
    TemperatureRule, TrainBudget, TrainingConfig, VpSdeConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("unknown task '{0}' (available: branin)")]
    UnknownTask(String),

    #[error("no task name given (set [task].name or pass --task)")]
    MissingTask,

    #[error("no dataset given (set [task].dataset or pass --dataset)")]
    MissingDataset,

    #[error("validation_fraction must be in [0, 1), got {0}")]
    InvalidFraction(f64),

    #[error("invalid duration '{0}' (expected DD:HH:MM:SS, HH:MM:SS or MM:SS)")]
    InvalidDuration(String),

    #[error("set at most one of temperature and temperature_per_example")]
    AmbiguousTemperature,

    #[error("weighting temperature must be positive and finite, got {0}")]
    InvalidTemperature(f64),

    #[error("lambda must be in [0, 1], got {0}")]
    InvalidLambda(f64),
}

/// Top-level structure matching `configs/*.toml`. Every section is optional.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExperimentToml {
    pub task: TaskSection,
    pub model: ModelSection,
    pub training: TrainingSection,
    pub sampling: SamplingSection,
}

/// Dataset and preprocessing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskSection {
    pub name: Option<String>,
    pub dataset: Option<PathBuf>,
    pub normalize_x: bool,
    pub normalize_y: bool,
    pub validation_fraction: f64,
    /// Fixed weighting temperature.
    pub temperature: Option<f64>,
    /// Temperature per dataset example (`t = k * N`).
    pub temperature_per_example: Option<f64>,
}

impl Default for TaskSection {
    fn default() -> Self {
        Self {
            name: None,
            dataset: None,
            normalize_x: true,
            normalize_y: true,
            validation_fraction: 0.1,
            temperature: None,
            temperature_per_example: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSection {
    pub hidden_dim: usize,
    pub num_hidden_layers: usize,
    pub dropout: f64,
    pub beta_min: f64,
    pub beta_max: f64,
    pub horizon: f64,
    pub loss: LossKind,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            hidden_dim: 256,
            num_hidden_layers: 3,
            dropout: 0.0,
            beta_min: 0.1,
            beta_max: 20.0,
            horizon: 1.0,
            loss: LossKind::Standard,
        }
    }
}

/// Optimizer, duration and checkpoint settings.
///
/// Exactly one of `max_epochs`, `max_steps`, `train_time` and exactly one of
/// the `checkpoint_*` keys must end up set after CLI overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrainingSection {
    pub batch_size: usize,
    pub lr: f64,
    pub weight_decay: f64,
    pub max_grad_norm: f64,
    pub warmup_steps: usize,
    pub cosine_decay: bool,
    pub t_min: f64,
    pub cond_drop_prob: f64,
    pub eval_batch_size: usize,
    pub max_epochs: Option<usize>,
    pub max_steps: Option<usize>,
    pub train_time: Option<String>,
    pub checkpoint_every_n_epochs: Option<usize>,
    pub checkpoint_every_n_steps: Option<usize>,
    pub checkpoint_time_interval: Option<String>,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            batch_size: 64,
            lr: 1e-3,
            weight_decay: 0.0,
            max_grad_norm: 1.0,
            warmup_steps: 0,
            cosine_decay: false,
            t_min: 1e-3,
            cond_drop_prob: 0.1,
            eval_batch_size: 256,
            max_epochs: None,
            max_steps: None,
            train_time: None,
            checkpoint_every_n_epochs: None,
            checkpoint_every_n_steps: None,
            checkpoint_time_interval: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingSection {
    pub num_samples: usize,
    pub num_steps: usize,
    pub condition: f32,
    pub guidance: Vec<f64>,
    /// 0 samples the reverse SDE, 1 the probability-flow ODE.
    pub lambda: f64,
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            num_samples: 512,
            num_steps: 1000,
            condition: 1.0,
            guidance: vec![2.0],
            lambda: 0.0,
        }
    }
}

/// Load and deserialize an `ExperimentToml` from a TOML file.
pub fn load_experiment_toml(path: &Path) -> Result<ExperimentToml, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ExperimentToml = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "Loaded experiment config");
    Ok(config)
}

/// Parse `DD:HH:MM:SS`, `HH:MM:SS` or `MM:SS` into seconds.
pub fn parse_duration(s: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let parts: Vec<u64> = s
        .trim()
        .split(':')
        .map(|p| p.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<_, _>>()?;
    let multipliers: &[u64] = match parts.len() {
        2 => &[60, 1],
        3 => &[3600, 60, 1],
        4 => &[86_400, 3600, 60, 1],
        _ => return Err(invalid()),
    };
    Ok(parts.iter().zip(multipliers).map(|(p, m)| p * m).sum())
}

/// CLI flags that override `[task]` and `[training]`.
#[derive(Debug, Default, Clone)]
pub struct TrainOverrides {
    pub task: Option<String>,
    pub dataset: Option<PathBuf>,
    pub max_epochs: Option<usize>,
    pub max_steps: Option<usize>,
    pub train_time: Option<String>,
    pub batch_size: Option<usize>,
    pub lr: Option<f64>,
    pub loss: Option<LossKind>,
    pub validation_fraction: Option<f64>,
}

/// CLI flags that override `[sampling]`.
#[derive(Debug, Default, Clone)]
pub struct SamplingOverrides {
    pub num_samples: Option<usize>,
    pub num_steps: Option<usize>,
    pub condition: Option<f32>,
    pub guidance: Option<Vec<f64>>,
    pub lambda: Option<f64>,
}

/// Task preprocessing after merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSettings {
    pub name: String,
    pub dataset: PathBuf,
    pub normalize_x: bool,
    pub normalize_y: bool,
    pub validation_fraction: f64,
    pub temperature: TemperatureRule,
}

/// Everything `train` needs, validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTrain {
    pub task: TaskSettings,
    /// Model config without its design dimension, which comes from the data.
    pub model: ScoreNetConfig,
    pub training: TrainingConfig,
}

impl ExperimentToml {
    /// Merge train overrides into the TOML values.
    pub fn apply_train_overrides(&mut self, overrides: &TrainOverrides) {
        if let Some(task) = &overrides.task {
            self.task.name = Some(task.clone());
        }
        if let Some(dataset) = &overrides.dataset {
            self.task.dataset = Some(dataset.clone());
        }
        if let Some(f) = overrides.validation_fraction {
            self.task.validation_fraction = f;
        }
        if let Some(loss) = overrides.loss {
            self.model.loss = loss;
        }
        let t = &mut self.training;
        // A duration flag on the command line replaces whichever bound the TOML set.
        if overrides.max_epochs.is_some()
            || overrides.max_steps.is_some()
            || overrides.train_time.is_some()
        {
            t.max_epochs = overrides.max_epochs;
            t.max_steps = overrides.max_steps;
            t.train_time = overrides.train_time.clone();
        }
        if let Some(bs) = overrides.batch_size {
            t.batch_size = bs;
        }
        if let Some(lr) = overrides.lr {
            t.lr = lr;
        }
    }

    /// Merge sampling overrides into the TOML values.
    pub fn apply_sampling_overrides(&mut self, overrides: &SamplingOverrides) {
        let s = &mut self.sampling;
        if let Some(n) = overrides.num_samples {
            s.num_samples = n;
        }
        if let Some(n) = overrides.num_steps {
            s.num_steps = n;
        }
        if let Some(c) = overrides.condition {
            s.condition = c;
        }
        if let Some(g) = &overrides.guidance {
            s.guidance = g.clone();
        }
        if let Some(lambda) = overrides.lambda {
            s.lambda = lambda;
        }
    }

    pub fn task_settings(&self) -> Result<TaskSettings, ConfigError> {
        let name = self.task.name.clone().ok_or(ConfigError::MissingTask)?;
        if design_task::evaluator_for(&name).is_none() {
            return Err(ConfigError::UnknownTask(name));
        }
        let dataset = self.task.dataset.clone().ok_or(ConfigError::MissingDataset)?;
        let fraction = self.task.validation_fraction;
        if !(0.0..1.0).contains(&fraction) {
            return Err(ConfigError::InvalidFraction(fraction));
        }
        let temperature = match (self.task.temperature, self.task.temperature_per_example) {
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTemperature),
            (Some(t), None) => TemperatureRule::Fixed(t),
            (None, Some(k)) => TemperatureRule::ScaledByLength(k),
            (None, None) => TemperatureRule::default(),
        };
        let value = match temperature {
            TemperatureRule::Fixed(v) | TemperatureRule::ScaledByLength(v) => v,
        };
        if !(value.is_finite() && value > 0.0) {
            return Err(ConfigError::InvalidTemperature(value));
        }
        Ok(TaskSettings {
            name,
            dataset,
            normalize_x: self.task.normalize_x,
            normalize_y: self.task.normalize_y,
            validation_fraction: fraction,
            temperature,
        })
    }

    /// Model config for a dataset with `design_dim` features.
    pub fn model_config(&self, design_dim: usize) -> ScoreNetConfig {
        let m = &self.model;
        ScoreNetConfig::new(design_dim)
            .with_hidden_dim(m.hidden_dim)
            .with_num_hidden_layers(m.num_hidden_layers)
            .with_dropout(m.dropout)
            .with_sde(
                VpSdeConfig::new()
                    .with_beta_min(m.beta_min)
                    .with_beta_max(m.beta_max)
                    .with_horizon(m.horizon),
            )
            .with_loss(m.loss)
    }

    pub fn training_config(&self) -> Result<TrainingConfig, ConfigError> {
        let t = &self.training;
        let train_time = t.train_time.as_deref().map(parse_duration).transpose()?;
        let interval = t
            .checkpoint_time_interval
            .as_deref()
            .map(parse_duration)
            .transpose()?;
        let budget = TrainBudget::from_parts(t.max_epochs, t.max_steps, train_time)?;
        let checkpoint = CheckpointSchedule::from_parts(
            t.checkpoint_every_n_epochs,
            t.checkpoint_every_n_steps,
            interval,
        )?;
        Ok(TrainingConfig::new(budget, checkpoint)
            .with_batch_size(t.batch_size)
            .with_lr(t.lr)
            .with_weight_decay(t.weight_decay)
            .with_max_grad_norm(t.max_grad_norm)
            .with_warmup_steps(t.warmup_steps)
            .with_cosine_decay(t.cosine_decay)
            .with_t_min(t.t_min)
            .with_cond_drop_prob(t.cond_drop_prob)
            .with_eval_batch_size(t.eval_batch_size))
    }

    pub fn evaluation_config(&self) -> Result<EvaluationConfig, ConfigError> {
        let s = &self.sampling;
        if !(0.0..=1.0).contains(&s.lambda) {
            return Err(ConfigError::InvalidLambda(s.lambda));
        }
        Ok(EvaluationConfig::new()
            .with_num_samples(s.num_samples)
            .with_num_steps(s.num_steps)
            .with_condition(s.condition)
            .with_guidance(s.guidance.clone())
            .with_lambda(s.lambda))
    }

    /// Validate everything `train` needs before touching any data.
    pub fn resolve_train(&self) -> Result<ResolvedTrain, ConfigError> {
        Ok(ResolvedTrain {
            task: self.task_settings()?,
            model: self.model_config(0),
            training: self.training_config()?,
        })
    }
}
