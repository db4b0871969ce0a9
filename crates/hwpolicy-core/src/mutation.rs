use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::bounds;
use crate::state::{PolicySnapshot, PolicyState};
use crate::weights::WeightDelta;

pub const UNSPECIFIED_CAUSE: &str = "unspecified";

#[derive(Debug, Clone, PartialEq)]
pub struct MutationReport {
    pub snapshot: PolicySnapshot,
    pub previous_version: u64,
    /// Impact names that matched no criterion or carried a non-finite value.
    pub ignored: Vec<String>,
    /// Snapshots dropped because they sat beyond a rollback point.
    pub discarded_versions: Vec<u64>,
}

impl PolicyState {
    /// Applies an outcome's impact vector as one new policy version.
    ///
    /// The impact is added to the current weights, the sum is passed through
    /// bounds enforcement, and the result is recorded as version
    /// `current + 1`. After a rollback the versions above the current one
    /// are dropped first, so the new snapshot takes their place.
    pub fn mutate(
        &mut self,
        cause: &str,
        impact: &BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> MutationReport {
        let (raw_delta, ignored) = WeightDelta::from_impact(impact);
        let old_weights = self.current_weights;
        let new_weights = bounds::enforce(old_weights.offset_by(&raw_delta));

        let previous_version = self.current_version;
        let mut discarded_versions = Vec::new();
        self.history.retain(|s| {
            if s.version > previous_version {
                discarded_versions.push(s.version);
                false
            } else {
                true
            }
        });

        let cause = cause.trim();
        let snapshot = PolicySnapshot {
            version: previous_version + 1,
            timestamp: now,
            cause: if cause.is_empty() {
                UNSPECIFIED_CAUSE.to_string()
            } else {
                cause.to_string()
            },
            weights: new_weights,
            delta: new_weights.delta_from(&old_weights),
        };

        self.history.push(snapshot.clone());
        self.current_version = snapshot.version;
        self.current_weights = new_weights;

        MutationReport {
            snapshot,
            previous_version,
            ignored,
            discarded_versions,
        }
    }
}
