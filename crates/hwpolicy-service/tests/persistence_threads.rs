use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hwpolicy_core::HardwareCatalog;
use hwpolicy_service::{Persistence, PolicyService, PolicySettings};
use hwpolicy_storage::{PersistedPolicy, PolicyStore, StorageError};

/// Every save hangs far past the service timeout.
#[derive(Default)]
struct HungStore {
    saves: AtomicUsize,
}

impl PolicyStore for HungStore {
    fn name(&self) -> &'static str {
        "hung"
    }

    fn load(&self) -> Result<Option<PersistedPolicy>, StorageError> {
        Ok(None)
    }

    fn save(&self, _policy: &PersistedPolicy) -> Result<(), StorageError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_secs(30));
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

fn os_thread_count() -> Option<usize> {
    std::fs::read_to_string("/proc/self/status")
        .ok()?
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))?
        .trim()
        .parse()
        .ok()
}

// Kept alone in this binary so other tests' threads do not skew the count.
#[test]
fn hung_store_costs_one_thread_however_many_writes_time_out() {
    let store = Arc::new(HungStore::default());
    let settings = PolicySettings {
        persist_timeout: Duration::from_millis(2),
        ..PolicySettings::default()
    };
    let impact = BTreeMap::from([("risk".to_string(), 0.1), ("cost".to_string(), -0.1)]);

    let before = os_thread_count();
    let service = PolicyService::new(
        HardwareCatalog::builtin(),
        settings,
        Arc::clone(&store) as Arc<dyn PolicyStore>,
    )
    .expect("service");

    for round in 0..200 {
        let applied = service.report_outcome("timeout", &impact);
        assert!(
            matches!(
                applied.persistence,
                Persistence::Degraded(StorageError::Timeout { timeout_ms: 2 })
            ),
            "round {round}: {:?}",
            applied.persistence
        );
    }

    assert_eq!(service.policy().version, 201);
    assert!(store.saves.load(Ordering::SeqCst) <= 1);
    if let (Some(before), Some(after)) = (before, os_thread_count()) {
        assert!(after <= before + 1, "threads grew from {before} to {after}");
    }
}
