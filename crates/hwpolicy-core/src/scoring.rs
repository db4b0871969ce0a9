use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{HardwareCatalog, HardwareSpec, Normalization};
use crate::state::PolicyView;
use crate::weights::PolicyWeights;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub memory_gb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
}

impl ResourceRequirement {
    pub fn new(memory_gb: f64) -> Self {
        Self {
            memory_gb,
            workload: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.memory_gb.is_finite() && self.memory_gb >= 0.0
    }
}

/// Unit-free sub-scores in `[0, 1]`; higher is better for every criterion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CriterionScores {
    pub cost: f64,
    #[serde(rename = "perf")]
    pub performance: f64,
    pub risk: f64,
}

impl CriterionScores {
    pub fn of(spec: &HardwareSpec, norm: &Normalization) -> Self {
        Self {
            cost: 1.0 - (spec.unit_cost / norm.cost).min(1.0),
            performance: (spec.memory_gb / norm.performance).min(1.0),
            risk: spec.reliability.clamp(0.0, 1.0),
        }
    }

    pub fn weighted(&self, weights: &PolicyWeights) -> f64 {
        weights.cost * self.cost + weights.performance * self.performance + weights.risk * self.risk
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareScore {
    pub hardware_id: String,
    pub criteria: CriterionScores,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub requirement: ResourceRequirement,
    pub selected_hardware: String,
    pub score_breakdown: BTreeMap<String, f64>,
    pub candidates: Vec<HardwareScore>,
    pub policy_version_at_decision: u64,
    /// Informational only; selection never looks at it.
    pub capacity_sufficient: bool,
}

/// Scores every catalog entry under `view` and picks the highest total.
/// Ties go to the entry that comes first in catalog order.
pub fn evaluate(
    catalog: &HardwareCatalog,
    view: &PolicyView,
    requirement: &ResourceRequirement,
) -> DecisionRecord {
    let norm = catalog.normalization();
    let candidates = catalog
        .entries()
        .iter()
        .map(|spec| {
            let criteria = CriterionScores::of(spec, &norm);
            HardwareScore {
                hardware_id: spec.id.clone(),
                total: criteria.weighted(&view.weights),
                criteria,
            }
        })
        .collect::<Vec<_>>();

    let mut best: Option<&HardwareScore> = None;
    for candidate in &candidates {
        match best {
            Some(current) if candidate.total <= current.total => {}
            _ => best = Some(candidate),
        }
    }
    let selected_hardware = best.map(|b| b.hardware_id.clone()).unwrap_or_default();

    let capacity_sufficient = catalog
        .get(&selected_hardware)
        .is_some_and(|spec| spec.memory_gb >= requirement.memory_gb);

    let score_breakdown = candidates
        .iter()
        .map(|c| (c.hardware_id.clone(), c.total))
        .collect();

    DecisionRecord {
        requirement: requirement.clone(),
        selected_hardware,
        score_breakdown,
        candidates,
        policy_version_at_decision: view.version,
        capacity_sufficient,
    }
}
