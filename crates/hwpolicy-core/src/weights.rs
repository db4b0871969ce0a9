use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const MIN_WEIGHT: f64 = 0.05;
pub const MAX_WEIGHT: f64 = 0.95;
pub const SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Cost,
    Performance,
    Risk,
}

impl Criterion {
    pub const ALL: [Self; 3] = [Self::Cost, Self::Performance, Self::Risk];

    /// Accepts the wire names plus the long aliases outcome reporters tend to use.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cost" => Some(Self::Cost),
            "perf" | "performance" => Some(Self::Performance),
            "risk" | "reliability" => Some(Self::Risk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyWeights {
    pub cost: f64,
    #[serde(rename = "perf", alias = "performance")]
    pub performance: f64,
    pub risk: f64,
}

/// The naive cost-first policy a fresh deployment starts from.
pub const DEFAULT_BASELINE: PolicyWeights = PolicyWeights::new(0.8, 0.1, 0.1);

impl PolicyWeights {
    pub const fn new(cost: f64, performance: f64, risk: f64) -> Self {
        Self {
            cost,
            performance,
            risk,
        }
    }

    pub fn get(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Cost => self.cost,
            Criterion::Performance => self.performance,
            Criterion::Risk => self.risk,
        }
    }

    pub fn set(&mut self, criterion: Criterion, value: f64) {
        match criterion {
            Criterion::Cost => self.cost = value,
            Criterion::Performance => self.performance = value,
            Criterion::Risk => self.risk = value,
        }
    }

    pub fn sum(&self) -> f64 {
        self.cost + self.performance + self.risk
    }

    #[must_use]
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(f(self.cost), f(self.performance), f(self.risk))
    }

    /// Both at-rest invariants: every weight in bounds, total within tolerance of one.
    pub fn is_valid(&self) -> bool {
        Criterion::ALL.iter().all(|c| {
            let w = self.get(*c);
            (MIN_WEIGHT..=MAX_WEIGHT).contains(&w)
        }) && (self.sum() - 1.0).abs() < SUM_TOLERANCE
    }

    /// Applies an additive delta without any bounds handling.
    #[must_use]
    pub fn offset_by(self, delta: &WeightDelta) -> Self {
        Self::new(
            self.cost + delta.cost,
            self.performance + delta.performance,
            self.risk + delta.risk,
        )
    }

    pub fn delta_from(&self, older: &Self) -> WeightDelta {
        WeightDelta {
            cost: self.cost - older.cost,
            performance: self.performance - older.performance,
            risk: self.risk - older.risk,
        }
    }

    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        Criterion::ALL
            .iter()
            .map(|c| (self.get(*c) - other.get(*c)).abs())
            .fold(0.0, f64::max)
    }
}

impl Default for PolicyWeights {
    fn default() -> Self {
        DEFAULT_BASELINE
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightDelta {
    #[serde(default)]
    pub cost: f64,
    #[serde(default, rename = "perf", alias = "performance")]
    pub performance: f64,
    #[serde(default)]
    pub risk: f64,
}

impl WeightDelta {
    pub fn get(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Cost => self.cost,
            Criterion::Performance => self.performance,
            Criterion::Risk => self.risk,
        }
    }

    fn add(&mut self, criterion: Criterion, value: f64) {
        match criterion {
            Criterion::Cost => self.cost += value,
            Criterion::Performance => self.performance += value,
            Criterion::Risk => self.risk += value,
        }
    }

    pub fn is_zero(&self) -> bool {
        Criterion::ALL.iter().all(|c| self.get(*c) == 0.0)
    }

    /// Folds a named impact map into a delta. Unrecognized names and
    /// non-finite values contribute nothing and are returned for logging.
    pub fn from_impact(impact: &BTreeMap<String, f64>) -> (Self, Vec<String>) {
        let mut delta = Self::default();
        let mut ignored = Vec::new();
        for (name, value) in impact {
            match Criterion::from_name(name) {
                Some(criterion) if value.is_finite() => delta.add(criterion, *value),
                _ => ignored.push(name.clone()),
            }
        }
        (delta, ignored)
    }
}
