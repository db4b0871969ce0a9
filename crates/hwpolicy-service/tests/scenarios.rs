//! End-to-end decision scenarios against a two-device catalog.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hwpolicy_core::{
    HardwareCatalog, HardwareSpec, Normalization, PolicyWeights, ResourceRequirement,
    RollbackSource, DEFAULT_BASELINE,
};
use hwpolicy_service::{PolicyError, PolicyService, PolicySettings};
use hwpolicy_storage::MemoryStore;

const SMALL: &str = "gpu-16gb";
const LARGE: &str = "gpu-80gb";

fn catalog() -> HardwareCatalog {
    HardwareCatalog::new(
        vec![
            HardwareSpec::new(SMALL, 16.0, 0.4, 0.95),
            HardwareSpec::new(LARGE, 80.0, 3.5, 0.9999),
        ],
        Normalization::default(),
    )
    .expect("catalog")
}

fn service() -> PolicyService {
    let settings = PolicySettings {
        persist_timeout: Duration::ZERO,
        ..PolicySettings::default()
    };
    PolicyService::new(catalog(), settings, Arc::new(MemoryStore::new())).expect("service")
}

fn oom_impact() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("risk".to_string(), 0.6),
        ("perf".to_string(), 0.4),
        ("cost".to_string(), -0.7),
    ])
}

fn large_job() -> ResourceRequirement {
    ResourceRequirement::new(80.0)
}

#[test]
fn baseline_prefers_cheap_device_even_when_undersized() {
    let service = service();
    let decision = service.evaluate(&large_job()).expect("evaluate");
    assert_eq!(decision.selected_hardware, SMALL);
    assert_eq!(decision.policy_version_at_decision, 1);
    assert!(!decision.capacity_sufficient);
    assert_eq!(decision.score_breakdown.len(), 2);
    assert!(decision.score_breakdown[SMALL] > decision.score_breakdown[LARGE]);
}

#[test]
fn oom_outcome_shifts_selection_to_large_device() {
    let service = service();
    let applied = service.report_outcome("OOM", &oom_impact());
    assert!(applied.persistence.is_durable());

    let weights = service.policy().weights;
    assert!(weights.is_valid());
    assert!((weights.cost - 0.05).abs() < 1e-9);
    assert!((weights.performance - 0.375).abs() < 1e-9);
    assert!((weights.risk - 0.575).abs() < 1e-9);

    let decision = service.evaluate(&large_job()).expect("evaluate");
    assert_eq!(decision.selected_hardware, LARGE);
    assert_eq!(decision.policy_version_at_decision, 2);
    assert!(decision.capacity_sufficient);
}

#[test]
fn rollback_to_baseline_restores_original_decision() {
    let service = service();
    let before = service.evaluate(&large_job()).expect("evaluate");
    service.report_outcome("OOM", &oom_impact());

    let applied = service.rollback(1).expect("rollback");
    assert_eq!(applied.value.to_version, 1);
    assert_eq!(applied.value.from_version, 2);
    assert_eq!(applied.value.source, RollbackSource::Snapshot);

    let weights = service.policy().weights;
    assert!(weights.max_abs_diff(&DEFAULT_BASELINE) < 1e-6);

    let after = service.evaluate(&large_job()).expect("evaluate");
    assert_eq!(after.selected_hardware, before.selected_hardware);
    assert_eq!(after.score_breakdown, before.score_breakdown);
}

#[test]
fn rollback_to_missing_version_changes_nothing() {
    let service = service();
    service.report_outcome("OOM", &oom_impact());
    let before = service.policy();
    let history_len = service.history().len();

    let err = service.rollback(999).expect_err("missing version");
    assert_eq!(
        err,
        PolicyError::VersionNotFound {
            requested: 999,
            current: 2
        }
    );
    assert_eq!(service.policy(), before);
    assert_eq!(service.history().len(), history_len);
}

#[test]
fn evaluate_is_deterministic_for_a_fixed_policy() {
    let service = service();
    service.report_outcome("latency", &BTreeMap::from([("perf".to_string(), 0.2)]));
    let first = service.evaluate(&ResourceRequirement::new(24.0)).expect("evaluate");
    for _ in 0..10 {
        assert_eq!(
            service.evaluate(&ResourceRequirement::new(24.0)).expect("evaluate"),
            first
        );
    }
}

#[test]
fn mutation_after_rollback_replaces_abandoned_branch() {
    let service = service();
    service.report_outcome("OOM", &oom_impact());
    service.report_outcome("OOM", &oom_impact());
    service.rollback(2).expect("rollback");

    let applied = service.report_outcome("cost-spike", &BTreeMap::from([("cost".to_string(), 0.3)]));
    assert_eq!(applied.value.version, 3);
    let history = service.history();
    let versions = history.iter().map(|s| s.version).collect::<Vec<_>>();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(history.last().map(|s| s.cause.as_str()), Some("cost-spike"));
}

#[test]
fn configured_baseline_drives_decay_and_reset() {
    let baseline = PolicyWeights::new(0.5, 0.25, 0.25);
    let settings = PolicySettings {
        baseline,
        persist_timeout: Duration::ZERO,
        ..PolicySettings::default()
    };
    let service =
        PolicyService::new(catalog(), settings, Arc::new(MemoryStore::new())).expect("service");
    assert_eq!(service.policy().weights, baseline);

    service.report_outcome("OOM", &oom_impact());
    let mutated = service.policy().weights;
    for _ in 0..20 {
        service.decay();
    }
    let decayed = service.policy().weights;
    assert!(decayed.max_abs_diff(&baseline) < mutated.max_abs_diff(&baseline));
    assert_eq!(service.policy().version, 2);

    let reset = service.reset();
    assert_eq!(reset.value.weights, baseline);
    assert_eq!(reset.value.version, 1);
}
