use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareSpec {
    pub id: String,
    pub memory_gb: f64,
    pub unit_cost: f64,
    pub reliability: f64,
}

impl HardwareSpec {
    pub fn new(id: impl Into<String>, memory_gb: f64, unit_cost: f64, reliability: f64) -> Self {
        Self {
            id: id.into(),
            memory_gb,
            unit_cost,
            reliability,
        }
    }
}

/// Divisors that turn raw attributes into unit-free sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Normalization {
    pub cost: f64,
    pub performance: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            cost: 5.0,
            performance: 80.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("hardware catalog is empty")]
    Empty,
    #[error("duplicate hardware id: {0}")]
    DuplicateId(String),
    #[error("hardware {id}: {reason}")]
    InvalidEntry { id: String, reason: String },
    #[error("normalization constant {name} must be finite and positive")]
    InvalidNormalization { name: &'static str },
}

/// Fixed, ordered set of selectable hardware. Iteration order is the order
/// entries were configured in and decides score ties.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareCatalog {
    entries: Vec<HardwareSpec>,
    normalization: Normalization,
}

impl HardwareCatalog {
    pub fn new(
        entries: Vec<HardwareSpec>,
        normalization: Normalization,
    ) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        for (name, value) in [
            ("cost", normalization.cost),
            ("performance", normalization.performance),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CatalogError::InvalidNormalization { name });
            }
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.id.trim().is_empty() {
                return Err(CatalogError::InvalidEntry {
                    id: entry.id.clone(),
                    reason: "id cannot be empty".to_string(),
                });
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(CatalogError::DuplicateId(entry.id.clone()));
            }
            validate_entry(entry)?;
        }

        Ok(Self {
            entries,
            normalization,
        })
    }

    pub fn builtin() -> Self {
        Self {
            entries: vec![
                HardwareSpec::new("t4-16gb", 16.0, 0.35, 0.95),
                HardwareSpec::new("a10g-24gb", 24.0, 1.0, 0.99),
                HardwareSpec::new("a100-80gb", 80.0, 3.7, 0.9999),
            ],
            normalization: Normalization::default(),
        }
    }

    pub fn entries(&self) -> &[HardwareSpec] {
        &self.entries
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn get(&self, id: &str) -> Option<&HardwareSpec> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry(entry: &HardwareSpec) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidEntry {
        id: entry.id.clone(),
        reason: reason.to_string(),
    };
    if !entry.memory_gb.is_finite() || entry.memory_gb < 0.0 {
        return Err(invalid("memory_gb must be finite and non-negative"));
    }
    if !entry.unit_cost.is_finite() || entry.unit_cost < 0.0 {
        return Err(invalid("unit_cost must be finite and non-negative"));
    }
    if !(0.0..=1.0).contains(&entry.reliability) {
        return Err(invalid("reliability must be within [0, 1]"));
    }
    Ok(())
}
