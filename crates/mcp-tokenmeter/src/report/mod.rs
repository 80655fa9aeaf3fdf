//! Per-category summaries, cost estimates and report output.

pub mod estimate;
pub mod render;
pub mod summary;

pub use estimate::{CategoryWeights, CostEstimator, FlatFactor};
pub use render::{format_number, write_json, write_text};
pub use summary::{CategorySummary, ItemCost, Report, aggregate};
