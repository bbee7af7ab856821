//! Evaluation pipeline: sample designs for a target score, score them with the
//! task oracle, and persist the results.

use std::path::{Path, PathBuf};

use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde::{Deserialize, Serialize};

use design_task::{DesignBatch, ScoreRecord, SnapshotWriter, Task};

use crate::model::bridge::{constant_column, tensor_to_batch, values_to_tensor};
use crate::model::sde::VpSde;
use crate::sampler::{draw_standard_normal, euler_maruyama, SamplerConfig, ScoreModel};

/// Name of the symlink pointing at the newest run directory.
pub const LATEST_RUN: &str = "latest-run";
pub const DESIGNS_FILE: &str = "designs.parquet";
pub const SCORES_FILE: &str = "scores.parquet";

/// Sampling settings for one evaluation run.
#[derive(Config, Debug)]
pub struct EvaluationConfig {
    /// Designs drawn per guidance strength.
    #[config(default = 512)]
    pub num_samples: usize,
    #[config(default = 1000)]
    pub num_steps: usize,
    /// Target score, in the task's score space.
    #[config(default = 1.0)]
    pub condition: f32,
    /// Guidance strengths to sweep. 0 is unconditional, 1 is plain conditional.
    #[config(default = "vec![2.0]")]
    pub guidance: Vec<f64>,
    /// SDE/ODE interpolation passed to the sampler.
    #[config(default = 0.0)]
    pub lambda: f64,
}

/// Per-guidance bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceSummary {
    pub guidance: f64,
    pub kept: usize,
    pub dropped: usize,
}

/// Finite samples from a guidance sweep, not yet scored.
#[derive(Debug, Clone)]
pub struct SampledDesigns {
    /// Surviving designs in native design space, item-shaped.
    pub designs: DesignBatch,
    /// The same rows as the model produced them: flattened, normalized.
    pub model_space: DesignBatch,
    /// Guidance strength that produced each design.
    pub design_guidance: Vec<f32>,
    pub sweep: Vec<GuidanceSummary>,
}

impl SampledDesigns {
    pub fn len(&self) -> usize {
        self.designs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.designs.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.sweep.iter().map(|s| s.dropped).sum()
    }
}

/// Designs and oracle scores from a guidance sweep.
#[derive(Debug, Clone)]
pub struct EvaluationOutput {
    /// Surviving designs in native design space, item-shaped.
    pub designs: DesignBatch,
    /// Guidance strength that produced each design.
    pub design_guidance: Vec<f32>,
    /// Oracle scores on the oracle's own scale, aligned with `designs`.
    pub scores: Vec<ScoreRecord>,
    pub sweep: Vec<GuidanceSummary>,
}

impl EvaluationOutput {
    pub fn dropped(&self) -> usize {
        self.sweep.iter().map(|s| s.dropped).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("sampling failed: {0:#}")]
    Sampling(anyhow::Error),

    /// The oracle failed after sampling succeeded. The samples are handed back
    /// so the caller can still persist them.
    #[error("scoring {} sampled designs failed: {cause:#}", .sampled.len())]
    Scoring {
        sampled: Box<SampledDesigns>,
        cause: anyhow::Error,
    },
}

/// Sample designs for every guidance strength in the sweep.
///
/// Rows with any non-finite value are dropped and counted, never fatal.
pub fn sample_designs<B: Backend, M: ScoreModel<B>>(
    model: &M,
    task: &Task,
    device: &B::Device,
    config: &EvaluationConfig,
    rng: &mut impl Rng,
) -> anyhow::Result<SampledDesigns> {
    let n = config.num_samples;
    let d = task.design_dim();
    let item_shape = task.input_shape();

    let mut empty_shape = vec![0];
    empty_shape.extend_from_slice(&item_shape);
    let mut designs = DesignBatch::new(Vec::new(), empty_shape)?;
    let mut model_space = DesignBatch::new(Vec::new(), vec![0, d])?;
    let mut design_guidance = Vec::new();
    let mut sweep = Vec::with_capacity(config.guidance.len());

    let pb = ProgressBar::new(config.guidance.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    for &guidance in &config.guidance {
        pb.set_message(format!("guidance {guidance}"));
        let x0 = values_to_tensor::<B>(draw_standard_normal(rng, n * d), n, d, device);
        let targets = constant_column::<B>(config.condition, n, device);
        let sampler = SamplerConfig::new(config.num_steps, guidance).with_lambda(config.lambda);
        let mut states = euler_maruyama(model, x0, targets, &sampler, rng)?;
        let last = states
            .pop()
            .ok_or_else(|| anyhow::anyhow!("sampler returned no states"))?;
        let sampled = tensor_to_batch(last)?;

        let finite: Vec<usize> = (0..sampled.len())
            .filter(|&i| sampled.is_row_finite(i))
            .collect();
        let dropped = sampled.len() - finite.len();
        if dropped > 0 {
            tracing::warn!(guidance, dropped, total = n, "Dropped non-finite samples");
        }
        sweep.push(GuidanceSummary {
            guidance,
            kept: finite.len(),
            dropped,
        });
        pb.inc(1);
        if finite.is_empty() {
            continue;
        }

        let kept = sampled.select_rows(&finite);
        let native = task.denormalize_x(&kept).reshape_items(&item_shape)?;
        designs.extend(&native)?;
        model_space.extend(&kept)?;
        design_guidance.extend(std::iter::repeat(guidance as f32).take(finite.len()));
    }
    pb.finish_and_clear();

    Ok(SampledDesigns {
        designs,
        model_space,
        design_guidance,
        sweep,
    })
}

/// Score sampled designs with the task oracle, on the oracle's own scale.
pub fn score_designs(task: &Task, sampled: &SampledDesigns) -> anyhow::Result<Vec<ScoreRecord>> {
    if sampled.is_empty() {
        return Ok(Vec::new());
    }
    let predicted = task.predict(&sampled.model_space)?;
    let native_scores = task.denormalize_y(&predicted);

    for summary in sampled.sweep.iter().filter(|s| s.kept > 0) {
        let best = native_scores
            .iter()
            .zip(&sampled.design_guidance)
            .filter(|&(_, &g)| g == summary.guidance as f32)
            .map(|(&s, _)| s)
            .fold(f32::NEG_INFINITY, f32::max);
        tracing::info!(guidance = summary.guidance, kept = summary.kept, best, "Scored samples");
    }

    Ok(native_scores
        .into_iter()
        .zip(&sampled.design_guidance)
        .map(|(score, &guidance)| ScoreRecord { guidance, score })
        .collect())
}

/// Sample and then score designs for every guidance strength in the sweep.
///
/// A scoring failure returns [`EvaluationError::Scoring`] carrying the samples.
pub fn generate_designs<B: Backend, M: ScoreModel<B>>(
    model: &M,
    task: &Task,
    device: &B::Device,
    config: &EvaluationConfig,
    rng: &mut impl Rng,
) -> Result<EvaluationOutput, EvaluationError> {
    let sampled =
        sample_designs(model, task, device, config, rng).map_err(EvaluationError::Sampling)?;
    match score_designs(task, &sampled) {
        Ok(scores) => Ok(EvaluationOutput {
            designs: sampled.designs,
            design_guidance: sampled.design_guidance,
            scores,
            sweep: sampled.sweep,
        }),
        Err(cause) => Err(EvaluationError::Scoring {
            sampled: Box::new(sampled),
            cause,
        }),
    }
}

/// Directory name for one evaluation run.
///
/// `{num_samples}_{num_steps}_{condition}_{guidance}_{lambda}_{beta_min}_{beta_max}_{uuid}`
/// with guidance values joined by `-`.
pub fn run_identifier(config: &EvaluationConfig, sde: &VpSde) -> String {
    let guidance = config
        .guidance
        .iter()
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join("-");
    format!(
        "{}_{}_{}_{}_{}_{}_{}_{}",
        config.num_samples,
        config.num_steps,
        config.condition,
        guidance,
        config.lambda,
        sde.beta_min,
        sde.beta_max,
        uuid::Uuid::new_v4()
    )
}

/// Write designs and scores under `results_root/run_id/`, copy `attachments`
/// alongside, and point `results_root/latest-run` at the new directory.
pub fn persist_results(
    results_root: &Path,
    run_id: &str,
    output: &EvaluationOutput,
    attachments: &[&Path],
) -> anyhow::Result<PathBuf> {
    let run_dir = write_run(
        results_root,
        run_id,
        &output.designs,
        &output.design_guidance,
        attachments,
    )?;
    SnapshotWriter::write_scores(&run_dir.join(SCORES_FILE), &output.scores)?;

    tracing::info!(
        designs = output.designs.len(),
        dropped = output.dropped(),
        path = %run_dir.display(),
        "Persisted evaluation results"
    );
    Ok(run_dir)
}

/// Like [`persist_results`] for designs that were never scored: no
/// `scores.parquet` is written.
pub fn persist_sampled(
    results_root: &Path,
    run_id: &str,
    sampled: &SampledDesigns,
    attachments: &[&Path],
) -> anyhow::Result<PathBuf> {
    let run_dir = write_run(
        results_root,
        run_id,
        &sampled.designs,
        &sampled.design_guidance,
        attachments,
    )?;
    tracing::warn!(
        designs = sampled.len(),
        path = %run_dir.display(),
        "Persisted unscored designs"
    );
    Ok(run_dir)
}

fn write_run(
    results_root: &Path,
    run_id: &str,
    designs: &DesignBatch,
    design_guidance: &[f32],
    attachments: &[&Path],
) -> anyhow::Result<PathBuf> {
    let run_dir = results_root.join(run_id);
    std::fs::create_dir_all(&run_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", run_dir.display()))?;

    SnapshotWriter::write_designs(&run_dir.join(DESIGNS_FILE), designs, design_guidance)?;

    for attachment in attachments {
        let name = attachment.file_name().ok_or_else(|| {
            anyhow::anyhow!("attachment {} has no file name", attachment.display())
        })?;
        std::fs::copy(attachment, run_dir.join(name))
            .map_err(|e| anyhow::anyhow!("Failed to copy {}: {e}", attachment.display()))?;
    }

    update_latest_link(results_root, run_id)?;
    Ok(run_dir)
}

fn update_latest_link(results_root: &Path, run_id: &str) -> anyhow::Result<()> {
    let link = results_root.join(LATEST_RUN);
    if link.symlink_metadata().is_ok() {
        std::fs::remove_file(&link)
            .map_err(|e| anyhow::anyhow!("Failed to unlink {}: {e}", link.display()))?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(run_id, &link)
        .map_err(|e| anyhow::anyhow!("Failed to link {}: {e}", link.display()))?;
    #[cfg(not(unix))]
    std::fs::write(&link, run_id)?;
    Ok(())
}
