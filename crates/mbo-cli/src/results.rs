//! Score summaries for evaluation runs.

use serde::{Deserialize, Serialize};

use design_task::ScoreRecord;

/// Statistics over a set of oracle scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub count: usize,
    pub max: f64,
    pub median: f64,
    pub mean: f64,
    /// 90th percentile.
    pub p90: f64,
}

impl ScoreStats {
    /// Returns `None` for an empty slice.
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(Self {
            count: sorted.len(),
            max: sorted[sorted.len() - 1],
            median: median(&mut sorted),
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p90: percentile(&mut sorted, 0.9),
        })
    }
}

/// Stats for one guidance strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceStats {
    pub guidance: f32,
    #[serde(flatten)]
    pub stats: ScoreStats,
}

/// Summary written as `summary.json` next to the evaluation artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    /// Over every guidance strength. `None` if no design survived.
    pub overall: Option<ScoreStats>,
    pub per_guidance: Vec<GuidanceStats>,
    /// Samples dropped for non-finite values.
    #[serde(default)]
    pub dropped: usize,
}

impl EvalSummary {
    /// Group records by guidance strength, in order of first appearance.
    pub fn from_records(records: &[ScoreRecord], dropped: usize) -> Self {
        let mut groups: Vec<(f32, Vec<f64>)> = Vec::new();
        for record in records {
            match groups.iter_mut().find(|(g, _)| *g == record.guidance) {
                Some((_, scores)) => scores.push(record.score as f64),
                None => groups.push((record.guidance, vec![record.score as f64])),
            }
        }
        let all: Vec<f64> = records.iter().map(|r| r.score as f64).collect();
        Self {
            overall: ScoreStats::from_scores(&all),
            per_guidance: groups
                .into_iter()
                .filter_map(|(guidance, scores)| {
                    ScoreStats::from_scores(&scores).map(|stats| GuidanceStats { guidance, stats })
                })
                .collect(),
            dropped,
        }
    }

    /// Human-readable table.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.overall {
            Some(s) => out.push_str(&format!(
                "designs: {}  max: {:.4}  median: {:.4}  mean: {:.4}  p90: {:.4}\n",
                s.count, s.max, s.median, s.mean, s.p90
            )),
            None => out.push_str("designs: 0\n"),
        }
        if self.dropped > 0 {
            out.push_str(&format!("dropped (non-finite): {}\n", self.dropped));
        }
        if self.per_guidance.len() > 1 {
            out.push_str(&format!(
                "{:>9} {:>6} {:>10} {:>10} {:>10} {:>10}\n",
                "guidance", "count", "max", "median", "mean", "p90"
            ));
            for g in &self.per_guidance {
                out.push_str(&format!(
                    "{:>9} {:>6} {:>10.4} {:>10.4} {:>10.4} {:>10.4}\n",
                    g.guidance,
                    g.stats.count,
                    g.stats.max,
                    g.stats.median,
                    g.stats.mean,
                    g.stats.p90
                ));
            }
        }
        out
    }
}

/// Compute the median of a slice of f64 values.
///
/// Returns 0.0 for empty slices.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Linear-interpolated percentile, `q` in [0, 1]. Returns 0.0 for empty slices.
pub fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (pos - lo as f64)
}
