//! Curated model catalog and hardware fit classification

use serde::{Deserialize, Serialize};

/// A locally runnable model we know the footprint of
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    /// Model name as the server knows it
    pub name: &'static str,
    /// Approximate memory needed to run it comfortably, in MB
    pub memory_mb: u32,
    pub description: &'static str,
}

/// Models the installer offers out of the box
pub const MODEL_CATALOG: &[ModelSpec] = &[
    ModelSpec {
        name: "llama3.2:3b",
        memory_mb: 3000,
        description: "Small general model, fine for rules lookups",
    },
    ModelSpec {
        name: "llama3.1:8b",
        memory_mb: 6000,
        description: "Default narrator model",
    },
    ModelSpec {
        name: "mistral:7b",
        memory_mb: 5500,
        description: "Alternative narrator with a different voice",
    },
    ModelSpec {
        name: "qwen2.5:14b",
        memory_mb: 10000,
        description: "Larger model for richer narration",
    },
    ModelSpec {
        name: "llama3.1:70b",
        memory_mb: 42000,
        description: "Workstation-class model",
    },
];

/// Look up the memory requirement for a model by name. Falls back to
/// matching the base name before the tag separator.
pub fn requirement_for(model: &str) -> Option<u32> {
    if let Some(spec) = MODEL_CATALOG.iter().find(|s| s.name == model) {
        return Some(spec.memory_mb);
    }
    let base = model.split(':').next().unwrap_or(model);
    MODEL_CATALOG
        .iter()
        .find(|s| s.name.split(':').next() == Some(base))
        .map(|s| s.memory_mb)
}

/// How well a model fits the available hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Optimal,
    Good,
    Limited,
    Insufficient,
}

impl PerformanceTier {
    /// Classify available capacity against a model's requirement.
    /// Boundaries are inclusive: 2x capacity is Optimal, 1.2x is Good,
    /// 0.8x is Limited.
    pub fn classify(system_capacity_mb: u32, model_requirement_mb: u32) -> Self {
        if model_requirement_mb == 0 {
            return PerformanceTier::Optimal;
        }
        let ratio = system_capacity_mb as f64 / model_requirement_mb as f64;
        if ratio >= 2.0 {
            PerformanceTier::Optimal
        } else if ratio >= 1.2 {
            PerformanceTier::Good
        } else if ratio >= 0.8 {
            PerformanceTier::Limited
        } else {
            PerformanceTier::Insufficient
        }
    }
}
