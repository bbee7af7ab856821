//! Training metrics, health checks and metric sinks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Losses for one training epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub step: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    pub lr: f64,
    pub elapsed_secs: f64,
}

impl EpochMetrics {
    /// Name and value of the checkpoint monitor for this epoch.
    pub fn monitor(&self) -> (&'static str, f64) {
        match self.val_loss {
            Some(v) => ("val_loss", v),
            None => ("train_loss", self.train_loss),
        }
    }

    /// Flat `(name, value)` pairs for a [`MetricLogger`].
    pub fn as_pairs(&self) -> Vec<(&'static str, f64)> {
        let mut pairs = vec![
            ("epoch", self.epoch as f64),
            ("train_loss", self.train_loss),
            ("lr", self.lr),
            ("elapsed_secs", self.elapsed_secs),
        ];
        if let Some(v) = self.val_loss {
            pairs.push(("val_loss", v));
        }
        pairs
    }

    /// Warnings for degenerate training.
    pub fn health_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.train_loss.is_finite() {
            warnings.push(format!("train loss is not finite ({})", self.train_loss));
        } else if self.train_loss > 1e6 {
            warnings.push(format!("train loss exploding ({:.3e})", self.train_loss));
        }
        if let Some(v) = self.val_loss {
            if !v.is_finite() {
                warnings.push(format!("validation loss is not finite ({v})"));
            } else if self.train_loss.is_finite() && v > 10.0 * self.train_loss.max(1e-8) {
                warnings.push(format!(
                    "validation loss {v:.4} is over 10x train loss {:.4}",
                    self.train_loss
                ));
            }
        }
        warnings
    }
}

/// Sink for scalar training metrics.
pub trait MetricLogger {
    fn log_metrics(&mut self, step: usize, metrics: &[(&str, f64)]) -> anyhow::Result<()>;
}

/// Emits metrics as structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl MetricLogger for TracingLogger {
    fn log_metrics(&mut self, step: usize, metrics: &[(&str, f64)]) -> anyhow::Result<()> {
        let rendered = metrics
            .iter()
            .map(|(name, value)| format!("{name}={value:.4e}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(step, "{rendered}");
        Ok(())
    }
}

/// Appends one JSON object per call to a file.
pub struct JsonlLogger {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl JsonlLogger {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricLogger for JsonlLogger {
    fn log_metrics(&mut self, step: usize, metrics: &[(&str, f64)]) -> anyhow::Result<()> {
        let mut record = serde_json::Map::new();
        record.insert("step".to_string(), step.into());
        for (name, value) in metrics {
            // Non-finite floats serialize as null.
            record.insert(name.to_string(), serde_json::json!(value));
        }
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Forwards every call to each inner logger.
#[derive(Default)]
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricLogger>>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, logger: impl MetricLogger + 'static) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }
}

impl MetricLogger for MultiLogger {
    fn log_metrics(&mut self, step: usize, metrics: &[(&str, f64)]) -> anyhow::Result<()> {
        for logger in &mut self.loggers {
            logger.log_metrics(step, metrics)?;
        }
        Ok(())
    }
}
