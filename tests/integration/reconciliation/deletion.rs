//! Finalizer-driven cleanup of deleted Konfigurations

use super::fakes::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use konfiguration_controller::controller::reconciler::AttemptState;
use konfiguration_controller::crd::{reasons, AttemptResult, ConditionStatus, UnitKey};
use konfiguration_controller::provider::ClusterError;
use serde_json::json;
use std::time::Duration;

/// A Konfiguration that applied a Namespace, a ConfigMap and a Service
async fn applied(h: &Harness, prune: bool) -> UnitKey {
    let mut unit = konfiguration("podinfo");
    unit.spec.prune = prune;
    let key = h.add(unit);
    h.renderer.set_objects(vec![
        namespace("team"),
        config_map("a", json!({"v": "1"})),
        service("web"),
    ]);
    assert_eq!(
        h.reconcile(&key).await.state,
        AttemptState::Completed(AttemptResult::Success)
    );
    h.cluster.clear_mutations();
    key
}

#[tokio::test]
async fn test_deletion_removes_objects_in_reverse_order_then_releases() {
    let h = Harness::new();
    let key = applied(&h, true).await;
    h.store.delete(&key);

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, AttemptState::Released);
    assert_eq!(report.requeue_after, None);

    assert_eq!(
        h.cluster.mutations(),
        vec![
            "delete Service/apps/web",
            "delete ConfigMap/apps/a",
            "delete Namespace/team"
        ]
    );
    assert_eq!(h.cluster.len(), 0);
    assert!(h.store.unit(&key).is_none());
}

#[tokio::test]
async fn test_prune_disabled_releases_without_deleting() {
    let h = Harness::new();
    let key = applied(&h, false).await;
    h.store.delete(&key);

    assert_eq!(h.reconcile(&key).await.state, AttemptState::Released);
    assert!(h.cluster.mutations().is_empty());
    assert_eq!(h.cluster.len(), 3);
    assert!(h.store.unit(&key).is_none());
}

#[tokio::test]
async fn test_suspended_releases_without_deleting() {
    let h = Harness::new();
    let key = applied(&h, true).await;
    h.store.update(&key, |unit| unit.spec.suspend = true);
    h.store.delete(&key);

    assert_eq!(h.reconcile(&key).await.state, AttemptState::Released);
    assert_eq!(h.cluster.len(), 3);
}

#[tokio::test]
async fn test_never_applied_releases_immediately() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.source.set_revision(None);
    h.reconcile(&key).await;
    h.store.delete(&key);

    assert_eq!(h.reconcile(&key).await.state, AttemptState::Released);
    assert!(h.store.unit(&key).is_none());
}

#[tokio::test]
async fn test_failed_cleanup_retries_then_gives_up() {
    let h = Harness::new();
    let key = applied(&h, true).await;
    h.cluster.fail(
        "delete",
        "a",
        ClusterError::Unavailable("connection refused".to_string()),
    );
    h.store.delete(&key);

    for attempt in 1..=2 {
        let report = h.reconcile(&key).await;
        assert_eq!(report.state, AttemptState::Deleting);
        assert_eq!(report.requeue_after, Some(Duration::from_secs(60)));

        let status = h.status(&key);
        assert_eq!(status.cleanup_attempts, Some(attempt));
        let remaining = status.snapshot.unwrap();
        assert_eq!(remaining.resources.len(), 1);
        assert_eq!(remaining.resources[0].name, "a");

        let ready = h.ready(&key);
        assert_eq!(ready.status, ConditionStatus::Unknown);
        assert_eq!(ready.reason, reasons::PROGRESSING);
        assert!(ready.message.contains("ConfigMap/apps/a"));
    }

    assert_eq!(h.reconcile(&key).await.state, AttemptState::Released);
    assert!(h.store.unit(&key).is_none());
    assert!(h.cluster.object(NAMESPACE, "ConfigMap", "a").is_some());
    assert!(h.cluster.object("", "Namespace", "team").is_none());
}

#[tokio::test]
async fn test_cleanup_recovers_after_transient_failure() {
    let h = Harness::new();
    let key = applied(&h, true).await;
    h.cluster.fail(
        "delete",
        "a",
        ClusterError::Unavailable("connection refused".to_string()),
    );
    h.store.delete(&key);
    assert_eq!(h.reconcile(&key).await.state, AttemptState::Deleting);

    h.cluster.clear_failures();
    assert_eq!(h.reconcile(&key).await.state, AttemptState::Released);
    assert_eq!(h.cluster.len(), 0);
}

#[tokio::test]
async fn test_without_finalizer_is_released() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.metadata.deletion_timestamp =
        Some(serde_json::from_value::<Time>(json!("2026-01-01T00:00:00Z")).unwrap());
    let key = h.add(unit);

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, AttemptState::Released);
    assert_eq!(h.store.commits(), 0);
}

#[tokio::test]
async fn test_deletion_interrupts_inflight_attempt() {
    let h = Harness::new();
    let key = applied(&h, true).await;
    let guard = h.scheduler.registry().try_begin(&key).unwrap();
    h.store.delete(&key);

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, AttemptState::Busy);
    assert!(guard.is_interrupted());
    assert_eq!(h.cluster.len(), 3);

    drop(guard);
    assert_eq!(h.reconcile(&key).await.state, AttemptState::Released);
    assert_eq!(h.cluster.len(), 0);
}
