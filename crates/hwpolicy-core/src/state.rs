//! Versioned policy state and its snapshot history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bounds;
use crate::weights::{PolicyWeights, WeightDelta};

pub const BASELINE_VERSION: u64 = 1;
pub const BASELINE_CAUSE: &str = "baseline";

/// Immutable record of one policy version and what produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    #[serde(rename = "v")]
    pub version: u64,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub cause: String,
    pub weights: PolicyWeights,
    #[serde(default)]
    pub delta: WeightDelta,
}

impl PolicySnapshot {
    pub fn baseline(weights: PolicyWeights, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: BASELINE_VERSION,
            timestamp,
            cause: BASELINE_CAUSE.to_string(),
            weights,
            delta: WeightDelta::default(),
        }
    }
}

/// What readers see: the active version and its weights, swapped as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PolicyView {
    pub version: u64,
    pub weights: PolicyWeights,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyState {
    pub(crate) current_version: u64,
    pub(crate) current_weights: PolicyWeights,
    pub(crate) history: Vec<PolicySnapshot>,
}

impl PolicyState {
    pub fn baseline(weights: PolicyWeights, now: DateTime<Utc>) -> Self {
        let weights = if weights.is_valid() {
            weights
        } else {
            bounds::enforce(weights)
        };
        Self {
            current_version: BASELINE_VERSION,
            current_weights: weights,
            history: vec![PolicySnapshot::baseline(weights, now)],
        }
    }

    /// Rebuilds a state from stored parts. Returns `true` as the second value
    /// when anything had to be repaired: out-of-bounds weights, a zero
    /// version, or history entries out of order.
    pub fn restore(
        version: u64,
        weights: PolicyWeights,
        mut history: Vec<PolicySnapshot>,
    ) -> (Self, bool) {
        let mut repaired = false;

        let current_weights = if weights.is_valid() {
            weights
        } else {
            repaired = true;
            bounds::enforce(weights)
        };

        let current_version = if version == 0 {
            repaired = true;
            BASELINE_VERSION
        } else {
            version
        };

        let ordered = history.windows(2).all(|pair| match pair {
            [a, b] => a.version < b.version,
            _ => true,
        });
        if !ordered {
            repaired = true;
            history.sort_by_key(|s| s.version);
            history.dedup_by_key(|s| s.version);
        }
        for snapshot in &mut history {
            if !snapshot.weights.is_valid() {
                repaired = true;
                snapshot.weights = bounds::enforce(snapshot.weights);
            }
        }

        (
            Self {
                current_version,
                current_weights,
                history,
            },
            repaired,
        )
    }

    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    pub fn current_weights(&self) -> PolicyWeights {
        self.current_weights
    }

    pub fn history(&self) -> &[PolicySnapshot] {
        &self.history
    }

    pub fn view(&self) -> PolicyView {
        PolicyView {
            version: self.current_version,
            weights: self.current_weights,
        }
    }

    pub fn snapshot(&self, version: u64) -> Option<&PolicySnapshot> {
        self.history.iter().find(|s| s.version == version)
    }
}
