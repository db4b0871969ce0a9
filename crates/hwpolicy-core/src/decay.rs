//! Gradual reversion of the live weights toward the baseline.
//!
//! Decay is continuous drift rather than a causal event: it rewrites the
//! current weights in place and leaves version and history alone.

use crate::bounds;
use crate::state::PolicyState;
use crate::weights::{Criterion, PolicyWeights};

pub const DEFAULT_DECAY_RATE: f64 = 0.05;
pub const DEFAULT_DECAY_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPolicy {
    /// Fraction of the gap to the baseline closed per call.
    pub rate: f64,
    /// Gaps at or below this are left alone.
    pub threshold: f64,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            rate: DEFAULT_DECAY_RATE,
            threshold: DEFAULT_DECAY_THRESHOLD,
        }
    }
}

impl DecayPolicy {
    /// One decay step over `weights`, or `None` when nothing is far enough
    /// from the baseline to move.
    pub fn step(&self, weights: PolicyWeights, baseline: &PolicyWeights) -> Option<PolicyWeights> {
        let rate = if self.rate.is_finite() {
            self.rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if rate == 0.0 {
            return None;
        }

        let mut next = weights;
        let mut moved = false;
        for criterion in Criterion::ALL {
            let gap = baseline.get(criterion) - weights.get(criterion);
            if gap.abs() > self.threshold {
                next.set(criterion, weights.get(criterion) + gap * rate);
                moved = true;
            }
        }

        moved.then(|| bounds::enforce(next))
    }
}

impl PolicyState {
    pub fn decay_toward(&mut self, baseline: &PolicyWeights, policy: &DecayPolicy) -> bool {
        match policy.step(self.current_weights, baseline) {
            Some(next) if next != self.current_weights => {
                self.current_weights = next;
                true
            }
            _ => false,
        }
    }
}
