//! Heuristic estimates of what another model family would pay.
//!
//! cl100k counts are exact; anything derived from them is a heuristic and is
//! always labelled as an estimate. Two policies exist and neither is assumed
//! authoritative, so the choice is configuration.

use std::collections::HashMap;

use anyhow::bail;

use super::summary::Report;
use crate::config::EstimateCfg;
use crate::mcp::Category;

pub const DEFAULT_LABEL: &str = "Claude";
pub const DEFAULT_FACTOR: f64 = 1.23;

pub trait CostEstimator: Send + Sync {
    /// Short name shown in the report, e.g. "Claude".
    fn label(&self) -> &str;
    fn estimate(&self, report: &Report) -> usize;
}

/// `total * factor`, truncated.
#[derive(Debug, Clone)]
pub struct FlatFactor {
    pub label: String,
    pub factor: f64,
}

impl Default for FlatFactor {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            factor: DEFAULT_FACTOR,
        }
    }
}

impl CostEstimator for FlatFactor {
    fn label(&self) -> &str {
        &self.label
    }

    fn estimate(&self, report: &Report) -> usize {
        (report.total_tokens as f64 * self.factor) as usize
    }
}

/// Sum of each category's total times its own weight, truncated.
/// Categories without a weight count at 1.0.
#[derive(Debug, Clone)]
pub struct CategoryWeights {
    pub label: String,
    pub weights: HashMap<Category, f64>,
}

impl CostEstimator for CategoryWeights {
    fn label(&self) -> &str {
        &self.label
    }

    fn estimate(&self, report: &Report) -> usize {
        let weighted: f64 = report
            .categories
            .iter()
            .map(|c| c.token_total as f64 * self.weights.get(&c.category).copied().unwrap_or(1.0))
            .sum();
        weighted as usize
    }
}

/// Build the configured estimator; flat 1.23 when nothing is configured.
pub fn from_config(cfg: Option<&EstimateCfg>) -> anyhow::Result<Box<dyn CostEstimator>> {
    let Some(cfg) = cfg else {
        return Ok(Box::new(FlatFactor::default()));
    };
    let label = cfg
        .label
        .clone()
        .unwrap_or_else(|| DEFAULT_LABEL.to_string());
    match cfg.mode.as_deref().unwrap_or("flat") {
        "flat" => {
            let factor = cfg.factor.unwrap_or(DEFAULT_FACTOR);
            if !factor.is_finite() || factor < 0.0 {
                bail!("estimate.factor must be a non-negative number, got {}", factor);
            }
            Ok(Box::new(FlatFactor { label, factor }))
        }
        "weighted" => {
            let mut weights = HashMap::new();
            if let Some(w) = cfg.weights.as_ref() {
                for (category, weight) in [
                    (Category::Tool, w.tools),
                    (Category::Prompt, w.prompts),
                    (Category::Resource, w.resources),
                    (Category::Template, w.templates),
                ] {
                    if let Some(weight) = weight {
                        if !weight.is_finite() || weight < 0.0 {
                            bail!("estimate.weights.{} must be non-negative, got {}", category, weight);
                        }
                        weights.insert(category, weight);
                    }
                }
            }
            Ok(Box::new(CategoryWeights { label, weights }))
        }
        other => bail!("unknown estimate.mode `{}` (expected `flat` or `weighted`)", other),
    }
}
