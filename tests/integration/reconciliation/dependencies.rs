//! Dependency gate ahead of rendering

use super::fakes::*;
use konfiguration_controller::controller::reconciler::AttemptState;
use konfiguration_controller::crd::{
    reasons, AttemptResult, ConditionStatus, DependencyReference, Konfiguration,
};
use serde_json::json;
use std::time::Duration;

fn depending_on(name: &str, dependencies: &[(&str, Option<&str>)]) -> Konfiguration {
    let mut unit = konfiguration(name);
    unit.spec.depends_on = dependencies
        .iter()
        .map(|(name, namespace)| DependencyReference {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        })
        .collect();
    unit
}

#[tokio::test]
async fn test_waits_for_dependency_to_become_ready() {
    let h = Harness::new();
    let base = h.add(konfiguration("base"));
    let app = h.add(depending_on("app", &[("base", None)]));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);

    let report = h.reconcile(&app).await;
    assert_eq!(report.state, AttemptState::DependencyNotReady);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(30)));
    assert_eq!(h.renderer.calls(), 0);

    let ready = h.ready(&app);
    assert_eq!(ready.status, ConditionStatus::Unknown);
    assert_eq!(ready.reason, reasons::DEPENDENCY_NOT_READY);
    assert!(ready.message.contains("apps/base"));
    assert_eq!(h.status(&app).last_attempted_revision, None);

    assert_eq!(
        h.reconcile(&base).await.state,
        AttemptState::Completed(AttemptResult::Success)
    );
    assert_eq!(
        h.reconcile(&app).await.state,
        AttemptState::Completed(AttemptResult::Success)
    );
    assert_eq!(h.ready(&app).reason, reasons::RECONCILIATION_SUCCEEDED);
}

#[tokio::test]
async fn test_failed_dependency_blocks() {
    let h = Harness::new();
    let base = h.add(konfiguration("base"));
    let app = h.add(depending_on("app", &[("base", None)]));
    h.renderer
        .set_outcome(RenderOutcome::Fatal("unknown variable 'replicas'".to_string()));
    h.reconcile(&base).await;
    assert_eq!(h.ready(&base).status, ConditionStatus::False);

    assert_eq!(h.reconcile(&app).await.state, AttemptState::DependencyNotReady);
}

#[tokio::test]
async fn test_missing_dependency_is_not_ready() {
    let h = Harness::new();
    let app = h.add(depending_on("app", &[("ghost", Some("platform"))]));

    assert_eq!(h.reconcile(&app).await.state, AttemptState::DependencyNotReady);
    let ready = h.ready(&app);
    assert!(ready.message.contains("platform/ghost"));
    assert!(ready.message.contains("not found"));
}

#[tokio::test]
async fn test_cycle_is_reported() {
    let h = Harness::new();
    let a = h.add(depending_on("a", &[("b", None)]));
    h.add(depending_on("b", &[("a", None)]));

    let report = h.reconcile(&a).await;
    assert_eq!(report.state, AttemptState::DependencyCycle);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(30)));

    let ready = h.ready(&a);
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, reasons::DEPENDENCY_CYCLE);
    assert!(ready.message.contains("apps/a -> apps/b -> apps/a"));
    assert_eq!(h.renderer.calls(), 0);
}

#[tokio::test]
async fn test_self_dependency_is_a_cycle() {
    let h = Harness::new();
    let a = h.add(depending_on("a", &[("a", None)]));

    assert_eq!(h.reconcile(&a).await.state, AttemptState::DependencyCycle);
}
