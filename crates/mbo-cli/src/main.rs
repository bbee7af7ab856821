use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use diffusion::LossKind;
use mbo_cli::config::{SamplingOverrides, TrainOverrides};
use mbo_cli::pipeline::{self, EvalArgs, SummaryArgs, TrainArgs};

/// sde-mbo: conditional score-based diffusion for offline model-based optimization.
#[derive(Parser)]
#[command(name = "sde-mbo", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for training, evaluation and result summaries.
#[derive(Subcommand)]
enum Command {
    /// Train a conditional score network on a task dataset.
    Train {
        /// Path to experiment config TOML file.
        #[arg(long, default_value = "configs/branin.toml")]
        config: PathBuf,
        /// Task name (overrides [task].name).
        #[arg(long)]
        task: Option<String>,
        /// Dataset snapshot Parquet file (overrides [task].dataset).
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Experiment name.
        #[arg(long, default_value = "default")]
        name: String,
        /// Run seed. Drawn at random and logged when omitted.
        #[arg(long)]
        seed: Option<u64>,
        /// Root directory for experiment outputs.
        #[arg(long, default_value = "experiments")]
        experiments_dir: PathBuf,
        /// Train for this many epochs (replaces the TOML duration bound).
        #[arg(long)]
        max_epochs: Option<usize>,
        /// Train for this many optimizer steps.
        #[arg(long)]
        max_steps: Option<usize>,
        /// Train for a wall-clock duration (DD:HH:MM:SS, HH:MM:SS or MM:SS).
        #[arg(long)]
        train_time: Option<String>,
        /// Override batch size.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Override learning rate.
        #[arg(long)]
        lr: Option<f64>,
        /// Override loss: "standard" or "score_matching".
        #[arg(long)]
        loss: Option<LossKind>,
        /// Override validation fraction.
        #[arg(long)]
        validation_fraction: Option<f64>,
    },
    /// Sample designs from a trained run and score them with the task oracle.
    Eval {
        /// Config TOML whose [sampling] section replaces the training run's.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Task name of the training run.
        #[arg(long)]
        task: String,
        /// Experiment name of the training run.
        #[arg(long, default_value = "default")]
        name: String,
        /// Seed of the training run.
        #[arg(long)]
        seed: u64,
        /// Dataset snapshot (defaults to the one used for training).
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Root directory for experiment outputs.
        #[arg(long, default_value = "experiments")]
        experiments_dir: PathBuf,
        /// Checkpoint `.mpk` to load. Defaults to the run's best checkpoint.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Target score, in the task's score space.
        #[arg(long)]
        condition: Option<f32>,
        /// Comma-separated guidance strengths to sweep.
        #[arg(long, value_delimiter = ',')]
        guidance: Option<Vec<f64>>,
        /// Number of sampler steps.
        #[arg(long)]
        num_steps: Option<usize>,
        /// Designs drawn per guidance strength.
        #[arg(long)]
        num_samples: Option<usize>,
        /// SDE/ODE interpolation in [0, 1]; 1 samples the probability-flow ODE.
        #[arg(long)]
        lambda: Option<f64>,
        /// Seed for sampler noise (defaults to --seed).
        #[arg(long)]
        sampling_seed: Option<u64>,
    },
    /// Print score statistics for an evaluation run.
    Summary {
        /// Evaluation run directory, or a results directory with a latest-run link.
        #[arg(long)]
        results: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            task,
            dataset,
            name,
            seed,
            experiments_dir,
            max_epochs,
            max_steps,
            train_time,
            batch_size,
            lr,
            loss,
            validation_fraction,
        } => pipeline::run_train(TrainArgs {
            config: Some(config),
            experiments_dir,
            name,
            seed,
            overrides: TrainOverrides {
                task,
                dataset,
                max_epochs,
                max_steps,
                train_time,
                batch_size,
                lr,
                loss,
                validation_fraction,
            },
        })
        .map(|_| ()),
        Command::Eval {
            config,
            task,
            name,
            seed,
            dataset,
            experiments_dir,
            checkpoint,
            condition,
            guidance,
            num_steps,
            num_samples,
            lambda,
            sampling_seed,
        } => pipeline::run_eval(EvalArgs {
            config,
            experiments_dir,
            task,
            name,
            seed,
            dataset,
            checkpoint,
            sampling: SamplingOverrides {
                num_samples,
                num_steps,
                condition,
                guidance,
                lambda,
            },
            sampling_seed,
        })
        .map(|_| ()),
        Command::Summary { results, json } => {
            pipeline::run_summary(SummaryArgs { results, json }).map(|_| ())
        }
    }
}
