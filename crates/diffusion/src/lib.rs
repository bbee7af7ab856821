//! Conditional score-based diffusion for offline model-based optimization.
//!
//! Trains a conditional score network on a weighted design dataset, samples
//! new designs for a target score with a reverse-time Euler–Maruyama solver,
//! and scores them against the task oracle.

pub mod evaluation;
pub mod mocks;
pub mod model;
pub mod sampler;
pub mod training;

pub use evaluation::{
    generate_designs, persist_results, persist_sampled, run_identifier, sample_designs,
    score_designs, EvaluationConfig, EvaluationError, EvaluationOutput, GuidanceSummary,
    SampledDesigns,
};
pub use model::score_net::{ScoreNet, ScoreNetConfig};
pub use model::sde::{VpSde, VpSdeConfig};
pub use sampler::{draw_standard_normal, euler_maruyama, SamplerConfig, SamplerError, ScoreModel};
pub use training::data::{
    get_weights, split_dataset, BatchSource, DatasetSplit, SplitError, TemperatureRule,
    WeightedBatch, WeightedDataset, WeightedExample,
};
pub use training::loss::LossKind;
pub use training::metrics::{EpochMetrics, JsonlLogger, MetricLogger, MultiLogger, TracingLogger};
pub use training::trainer::{
    checkpoint_stem, load_checkpoint, lr_schedule, train, CheckpointMeta, CheckpointSchedule,
    ScheduleError, TrainBudget, TrainOutcome, TrainRun, TrainingConfig,
};
