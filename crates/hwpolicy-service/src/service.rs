//! The policy service: one shared policy state behind a reader view and a
//! single writer lock, with every committed change handed to a store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use hwpolicy_core::{
    evaluate, DecisionRecord, HardwareCatalog, PolicySnapshot, PolicyState, PolicyView,
    ResourceRequirement, RollbackOutcome, RollbackSource,
};
use hwpolicy_storage::{JsonFileStore, PersistedPolicy, PolicyStore, StorageError};
use parking_lot::{Mutex, RwLock};

use crate::config::{PolicySettings, ServiceConfig};
use crate::error::{ConfigError, PolicyError};
use crate::persist::PersistWorker;

/// What happened to the durable copy after an in-memory change.
#[derive(Debug)]
pub enum Persistence {
    Durable,
    /// Nothing changed, so nothing was written.
    Skipped,
    /// The in-memory change stands but the store did not confirm it.
    Degraded(StorageError),
}

impl Persistence {
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// Result of a committed write plus the outcome of persisting it.
#[derive(Debug)]
pub struct Applied<T> {
    pub value: T,
    pub persistence: Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOrigin {
    /// Nothing was stored; started from the configured baseline.
    Fresh,
    /// Loaded from the store. `repaired` is set when the stored weights or
    /// history had to be fixed up.
    Restored { repaired: bool },
    /// The stored state was unreadable; started from the baseline.
    Recovered { reason: String },
}

pub struct PolicyService {
    catalog: HardwareCatalog,
    settings: PolicySettings,
    store: Arc<dyn PolicyStore>,
    view: RwLock<Arc<PolicyView>>,
    state: Mutex<PolicyState>,
    generation: AtomicU64,
    /// Absent when the persist timeout is zero and store calls run inline.
    worker: Option<PersistWorker>,
    origin: StartupOrigin,
}

impl std::fmt::Debug for PolicyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyService")
            .field("store", &self.store.name())
            .field("view", &*self.view.read())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl PolicyService {
    /// Opens the JSON file store named by `config` and restores from it.
    pub fn open(config: &ServiceConfig) -> Result<Self, ConfigError> {
        let store = JsonFileStore::open(&config.state_path)?;
        tracing::info!(
            path = %config.state_path.display(),
            hardware = config.catalog.len(),
            "opening policy state"
        );
        Self::new(
            config.catalog.clone(),
            config.settings.clone(),
            Arc::new(store),
        )
        .map_err(ConfigError::from)
    }

    /// Builds the service from whatever `store` holds. Unreadable content
    /// falls back to the baseline; only I/O errors that are not about the
    /// content itself are returned.
    pub fn new(
        catalog: HardwareCatalog,
        settings: PolicySettings,
        store: Arc<dyn PolicyStore>,
    ) -> Result<Self, StorageError> {
        let (state, origin) = match store.load() {
            Ok(Some(persisted)) => {
                let (state, repaired) = persisted.into_state();
                if repaired {
                    tracing::warn!(
                        store = store.name(),
                        version = state.current_version(),
                        "stored policy violated weight invariants and was repaired"
                    );
                }
                (state, StartupOrigin::Restored { repaired })
            }
            Ok(None) => (
                PolicyState::baseline(settings.baseline, Utc::now()),
                StartupOrigin::Fresh,
            ),
            Err(StorageError::Corrupt { path, reason }) => {
                tracing::warn!(
                    store = store.name(),
                    %path,
                    %reason,
                    "stored policy is corrupt; starting from baseline"
                );
                (
                    PolicyState::baseline(settings.baseline, Utc::now()),
                    StartupOrigin::Recovered { reason },
                )
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            version = state.current_version(),
            history = state.history().len(),
            origin = ?origin,
            "policy state ready"
        );

        let worker = if settings.persist_timeout.is_zero() {
            None
        } else {
            Some(PersistWorker::start(Arc::clone(&store))?)
        };

        Ok(Self {
            catalog,
            settings,
            store,
            view: RwLock::new(Arc::new(state.view())),
            state: Mutex::new(state),
            generation: AtomicU64::new(0),
            worker,
            origin,
        })
    }

    pub fn origin(&self) -> &StartupOrigin {
        &self.origin
    }

    pub fn catalog(&self) -> &HardwareCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    pub fn policy(&self) -> PolicyView {
        **self.view.read()
    }

    pub fn history(&self) -> Vec<PolicySnapshot> {
        self.state.lock().history().to_vec()
    }

    /// Scores the catalog under the currently published policy.
    pub fn evaluate(
        &self,
        requirement: &ResourceRequirement,
    ) -> Result<DecisionRecord, PolicyError> {
        if !requirement.is_valid() {
            return Err(PolicyError::InvalidRequirement(format!(
                "memory_gb must be finite and non-negative, got {}",
                requirement.memory_gb
            )));
        }
        let view = Arc::clone(&self.view.read());
        Ok(evaluate(&self.catalog, &view, requirement))
    }

    /// Folds an observed outcome into the policy as a new version.
    pub fn report_outcome(
        &self,
        cause: &str,
        impact: &BTreeMap<String, f64>,
    ) -> Applied<PolicySnapshot> {
        let mut state = self.state.lock();
        let report = state.mutate(cause, impact, Utc::now());
        if !report.ignored.is_empty() {
            tracing::debug!(ignored = ?report.ignored, "impact entries ignored");
        }
        if !report.discarded_versions.is_empty() {
            tracing::info!(
                discarded = ?report.discarded_versions,
                "history beyond rollback point replaced"
            );
        }
        tracing::info!(
            cause = %report.snapshot.cause,
            from = report.previous_version,
            to = report.snapshot.version,
            weights = ?report.snapshot.weights,
            "policy mutated"
        );
        self.publish(&state);
        let persistence = self.persist(&state);
        Applied {
            value: report.snapshot,
            persistence,
        }
    }

    pub fn rollback(&self, target: u64) -> Result<Applied<RollbackOutcome>, PolicyError> {
        let mut state = self.state.lock();
        let current = state.current_version();
        let Some(outcome) = state.rollback(target, &self.settings.baseline) else {
            tracing::debug!(target, current, "rollback target not found");
            return Err(PolicyError::VersionNotFound {
                requested: target,
                current,
            });
        };
        tracing::info!(
            from = outcome.from_version,
            to = outcome.to_version,
            synthesized = outcome.source == RollbackSource::SynthesizedBaseline,
            "policy rolled back"
        );
        self.publish(&state);
        let persistence = self.persist(&state);
        Ok(Applied {
            value: outcome,
            persistence,
        })
    }

    /// One decay step toward the baseline. Version and history are left alone.
    pub fn decay(&self) -> Applied<bool> {
        let mut state = self.state.lock();
        if !state.decay_toward(&self.settings.baseline, &self.settings.decay) {
            return Applied {
                value: false,
                persistence: Persistence::Skipped,
            };
        }
        tracing::debug!(
            version = state.current_version(),
            weights = ?state.current_weights(),
            "policy decayed toward baseline"
        );
        self.publish(&state);
        let persistence = self.persist(&state);
        Applied {
            value: true,
            persistence,
        }
    }

    /// Drops stored state and history and starts over at the baseline.
    pub fn reset(&self) -> Applied<PolicyView> {
        let mut state = self.state.lock();
        let discarded = state.current_version();
        *state = PolicyState::baseline(self.settings.baseline, Utc::now());
        tracing::info!(discarded_version = discarded, "policy reset to baseline");
        self.publish(&state);
        let persistence = self.run_store_op(|store| store.clear());
        Applied {
            value: state.view(),
            persistence,
        }
    }

    /// Writes the current state out, e.g. before shutdown.
    pub fn flush(&self) -> Persistence {
        let state = self.state.lock();
        self.persist(&state)
    }

    fn publish(&self, state: &PolicyState) {
        *self.view.write() = Arc::new(state.view());
    }

    fn persist(&self, state: &PolicyState) -> Persistence {
        let record = PersistedPolicy::from(state);
        self.run_store_op(move |store| store.save(&record))
    }

    /// Runs one store call under the configured timeout. Callers hold the
    /// writer lock, so generations are handed out in commit order.
    fn run_store_op<F>(&self, op: F) -> Persistence
    where
        F: FnOnce(&dyn PolicyStore) -> Result<(), StorageError> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let result = match &self.worker {
            Some(worker) => worker.submit(generation, Box::new(op), self.settings.persist_timeout),
            None => op(self.store.as_ref()),
        };

        match result {
            Ok(()) => Persistence::Durable,
            Err(err) => {
                tracing::warn!(
                    store = self.store.name(),
                    generation,
                    error = %err,
                    "policy persistence degraded; in-memory state kept"
                );
                Persistence::Degraded(err)
            }
        }
    }
}
