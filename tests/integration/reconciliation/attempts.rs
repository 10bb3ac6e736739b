//! Single-flight attempts, deadlines and interruption

use super::fakes::*;
use konfiguration_controller::controller::reconciler::AttemptState;
use konfiguration_controller::crd::{reasons, AttemptResult};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_second_attempt_for_same_key_is_busy() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);

    let guard = h.scheduler.registry().try_begin(&key).unwrap();
    let report = h.reconcile(&key).await;
    assert_eq!(report.state, AttemptState::Busy);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(1)));
    assert_eq!(h.renderer.calls(), 0);

    drop(guard);
    assert_eq!(
        h.reconcile(&key).await.state,
        AttemptState::Completed(AttemptResult::Success)
    );
}

#[tokio::test]
async fn test_other_keys_are_not_blocked() {
    let h = Harness::new();
    let busy = h.add(konfiguration("busy"));
    let free = h.add(konfiguration("free"));

    let _guard = h.scheduler.registry().try_begin(&busy).unwrap();
    assert_eq!(
        h.reconcile(&free).await.state,
        AttemptState::Completed(AttemptResult::Success)
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_render_times_out() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.timeout = Some("30s".to_string());
    let key = h.add(unit);
    h.renderer.set_delay(Some(Duration::from_secs(120)));

    let report = h.reconcile(&key).await;
    assert_eq!(
        report.state,
        AttemptState::Completed(AttemptResult::TransientFailure)
    );
    assert_eq!(report.requeue_after, Some(Duration::from_secs(60)));

    let ready = h.ready(&key);
    assert_eq!(ready.reason, reasons::TIMEOUT);
    assert!(ready.message.contains("render"));
    assert!(h.cluster.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_apply_times_out() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.timeout = Some("30s".to_string());
    let key = h.add(unit);
    h.renderer.set_objects(vec![
        config_map("a", json!({"v": "1"})),
        config_map("b", json!({"v": "1"})),
        config_map("c", json!({"v": "1"})),
    ]);
    h.cluster.set_delay(Some(Duration::from_secs(20)));

    let report = h.reconcile(&key).await;
    assert_eq!(
        report.state,
        AttemptState::Completed(AttemptResult::TransientFailure)
    );
    assert_eq!(h.ready(&key).reason, reasons::TIMEOUT);

    let status = h.status(&key);
    assert_eq!(status.last_applied_revision, None);
    assert_eq!(status.snapshot, None);
    assert_eq!(status.last_attempted_revision.as_deref(), Some("main@sha1:aaaaaaa"));
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_attempt_commits_nothing() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);
    h.renderer.set_delay(Some(Duration::from_secs(120)));

    let scheduler = h.scheduler.clone();
    let unit = h.unit(&key);
    let attempt = tokio::spawn(async move { scheduler.reconcile(&unit).await });

    while h.renderer.calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(h.scheduler.registry().is_inflight(&key));
    assert!(h.scheduler.registry().cancel(&key));

    let report = attempt.await.unwrap().unwrap();
    assert_eq!(report.state, AttemptState::Cancelled);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(1)));
    assert_eq!(h.store.commits(), 0);
    assert!(h.unit(&key).status.is_none());
    assert!(h.cluster.mutations().is_empty());
    assert!(!h.scheduler.registry().is_inflight(&key));
}
