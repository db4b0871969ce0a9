use crate::state::{PolicyState, BASELINE_VERSION};
use crate::weights::PolicyWeights;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackSource {
    /// Weights came from a snapshot in history.
    Snapshot,
    /// Version 1 was not in history; the configured baseline stood in.
    SynthesizedBaseline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollbackOutcome {
    pub from_version: u64,
    pub to_version: u64,
    pub weights: PolicyWeights,
    pub source: RollbackSource,
}

impl PolicyState {
    /// Moves the version pointer to `target` without touching history.
    ///
    /// Returns `None`, leaving the state as it was, when `target` is neither
    /// in history nor the baseline version.
    pub fn rollback(&mut self, target: u64, baseline: &PolicyWeights) -> Option<RollbackOutcome> {
        let (weights, source) = match self.snapshot(target) {
            Some(snapshot) => (snapshot.weights, RollbackSource::Snapshot),
            None if target == BASELINE_VERSION => {
                (*baseline, RollbackSource::SynthesizedBaseline)
            }
            None => return None,
        };

        let from_version = self.current_version;
        self.current_version = target;
        self.current_weights = weights;

        Some(RollbackOutcome {
            from_version,
            to_version: target,
            weights,
            source,
        })
    }
}
