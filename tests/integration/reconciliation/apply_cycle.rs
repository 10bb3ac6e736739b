//! Render, diff and apply through the scheduler

use super::fakes::*;
use konfiguration_controller::constants::FINALIZER;
use konfiguration_controller::controller::reconciler::AttemptState;
use konfiguration_controller::crd::{
    reasons, AttemptResult, ConditionStatus, DiffStrategy, KubeConfigReference, SecretReference,
};
use konfiguration_controller::provider::ClusterError;
use serde_json::json;
use std::time::Duration;

const SUCCESS: AttemptState = AttemptState::Completed(AttemptResult::Success);
const TRANSIENT: AttemptState = AttemptState::Completed(AttemptResult::TransientFailure);
const FATAL: AttemptState = AttemptState::Completed(AttemptResult::FatalFailure);

#[tokio::test]
async fn test_first_reconcile_applies_and_records_snapshot() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![
        namespace("team"),
        config_map("settings", json!({"a": "1"})),
        service("web"),
    ]);

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, SUCCESS);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(300)));

    let settings = h.cluster.object(NAMESPACE, "ConfigMap", "settings").unwrap();
    assert_eq!(settings["metadata"]["namespace"], "apps");
    assert!(h.cluster.object("", "Namespace", "team").is_some());
    assert!(h.cluster.object(NAMESPACE, "Service", "web").is_some());

    let status = h.status(&key);
    assert_eq!(status.last_applied_revision.as_deref(), Some("main@sha1:aaaaaaa"));
    assert_eq!(status.last_attempted_revision.as_deref(), Some("main@sha1:aaaaaaa"));
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.last_attempt_result, Some(AttemptResult::Success));
    assert!(status.next_reconcile_time.is_some());

    let snapshot = status.snapshot.unwrap();
    assert!(snapshot.checksum.starts_with("sha256:"));
    assert_eq!(snapshot.resources.len(), 3);
    assert_eq!(snapshot.entries[""]["Namespace"], vec!["team".to_string()]);
    assert_eq!(snapshot.entries["apps"]["ConfigMap"], vec!["settings".to_string()]);

    let ready = h.ready(&key);
    assert_eq!(ready.status, ConditionStatus::True);
    assert_eq!(ready.reason, reasons::RECONCILIATION_SUCCEEDED);
    assert!(h.unit(&key).has_finalizer(FINALIZER));
}

#[tokio::test]
async fn test_namespace_is_stripped_from_cluster_scoped_objects() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": "team", "namespace": "apps"}
    })]);

    assert_eq!(h.reconcile(&key).await.state, SUCCESS);
    let team = h.cluster.object("", "Namespace", "team").unwrap();
    assert!(team["metadata"].get("namespace").is_none());
    assert_eq!(h.status(&key).snapshot.unwrap().resources[0].namespace, None);
}

#[tokio::test]
async fn test_unchanged_revision_skips_render() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);
    h.reconcile(&key).await;
    let commits = h.store.commits();
    h.cluster.clear_mutations();

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, AttemptState::UpToDate);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(300)));
    assert_eq!(h.renderer.calls(), 1);
    assert!(h.cluster.mutations().is_empty());
    assert_eq!(h.store.commits(), commits);
}

#[tokio::test]
async fn test_reapply_is_idempotent_for_every_strategy() {
    for strategy in [DiffStrategy::All, DiffStrategy::Subset, DiffStrategy::LastApplied] {
        let h = Harness::new();
        let mut unit = konfiguration("podinfo");
        unit.spec.diff_strategy = strategy;
        let key = h.add(unit);
        h.renderer.set_objects(vec![
            config_map("settings", json!({"a": "1", "b": "2"})),
            service("web"),
        ]);

        assert_eq!(h.reconcile(&key).await.state, SUCCESS);
        let applied = h.cluster.objects();
        h.cluster.clear_mutations();

        h.request_reconcile(&key, "2026-10-14T10:00:00Z");
        assert_eq!(h.reconcile(&key).await.state, SUCCESS, "{strategy:?}");

        assert_eq!(h.renderer.calls(), 2, "{strategy:?}");
        assert!(h.cluster.mutations().is_empty(), "{strategy:?}");
        assert_eq!(h.cluster.objects(), applied, "{strategy:?}");
        assert_eq!(
            h.status(&key).last_handled_reconcile_at.as_deref(),
            Some("2026-10-14T10:00:00Z")
        );
    }
}

#[tokio::test]
async fn test_subset_leaves_foreign_fields_alone() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.cluster.insert(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "settings", "namespace": "apps", "labels": {"owner": "ops"}},
        "data": {"a": "1", "b": "2"}
    }));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);

    assert_eq!(h.reconcile(&key).await.state, SUCCESS);
    assert!(h.cluster.mutations().is_empty());

    h.source.set_revision(Some("main@sha1:bbbbbbb"));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "3"}))]);
    assert_eq!(h.reconcile(&key).await.state, SUCCESS);

    assert_eq!(h.cluster.mutations(), vec!["update ConfigMap/apps/settings"]);
    let live = h.cluster.object(NAMESPACE, "ConfigMap", "settings").unwrap();
    assert_eq!(live["data"], json!({"a": "3", "b": "2"}));
    assert_eq!(live["metadata"]["labels"]["owner"], "ops");
}

/// Apply `{a, b}`, let another actor add a label, then drop `b`
async fn drop_field(strategy: DiffStrategy) -> serde_json::Value {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.diff_strategy = strategy;
    let key = h.add(unit);
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1", "b": "2"}))]);
    assert_eq!(h.reconcile(&key).await.state, SUCCESS);

    h.cluster.patch(
        NAMESPACE,
        "ConfigMap",
        "settings",
        &json!({"metadata": {"labels": {"owner": "ops"}}}),
    );

    h.source.set_revision(Some("main@sha1:bbbbbbb"));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);
    assert_eq!(h.reconcile(&key).await.state, SUCCESS);
    h.cluster.object(NAMESPACE, "ConfigMap", "settings").unwrap()
}

#[tokio::test]
async fn test_last_applied_removes_dropped_fields() {
    let live = drop_field(DiffStrategy::LastApplied).await;
    assert_eq!(live["data"], json!({"a": "1"}));
    assert_eq!(live["metadata"]["labels"]["owner"], "ops");
}

#[tokio::test]
async fn test_subset_keeps_dropped_fields() {
    let live = drop_field(DiffStrategy::Subset).await;
    assert_eq!(live["data"], json!({"a": "1", "b": "2"}));
    assert_eq!(live["metadata"]["labels"]["owner"], "ops");
}

#[tokio::test]
async fn test_all_reasserts_drifted_fields() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.diff_strategy = DiffStrategy::All;
    let key = h.add(unit);
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);
    h.reconcile(&key).await;

    h.cluster.patch(
        NAMESPACE,
        "ConfigMap",
        "settings",
        &json!({"data": {"a": "9", "extra": "x"}}),
    );
    h.cluster.clear_mutations();
    h.request_reconcile(&key, "2026-10-14T10:00:00Z");
    assert_eq!(h.reconcile(&key).await.state, SUCCESS);

    assert_eq!(h.cluster.mutations(), vec!["update ConfigMap/apps/settings"]);
    let live = h.cluster.object(NAMESPACE, "ConfigMap", "settings").unwrap();
    assert_eq!(live["data"], json!({"a": "1"}));

    // Converged: the next cycle has nothing to do
    h.cluster.clear_mutations();
    h.request_reconcile(&key, "2026-10-14T11:00:00Z");
    assert_eq!(h.reconcile(&key).await.state, SUCCESS);
    assert!(h.cluster.mutations().is_empty());
}

#[tokio::test]
async fn test_render_failure_is_fatal_and_keeps_applied_state() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);
    h.reconcile(&key).await;
    let before = h.status(&key);
    h.cluster.clear_mutations();

    h.source.set_revision(Some("main@sha1:bbbbbbb"));
    h.renderer
        .set_outcome(RenderOutcome::Fatal("main.jsonnet:3:1 unexpected end of file".to_string()));
    let report = h.reconcile(&key).await;

    assert_eq!(report.state, FATAL);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(60)));
    let status = h.status(&key);
    assert_eq!(status.last_applied_revision, before.last_applied_revision);
    assert_eq!(status.last_attempted_revision.as_deref(), Some("main@sha1:bbbbbbb"));
    assert_eq!(status.snapshot, before.snapshot);
    let ready = h.ready(&key);
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, reasons::RENDER_FAILED);
    assert!(ready.message.contains("unexpected end of file"));
    assert!(h.cluster.mutations().is_empty());
}

#[tokio::test]
async fn test_unavailable_renderer_is_transient() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer
        .set_outcome(RenderOutcome::Unavailable("kubecfg not found in PATH".to_string()));

    assert_eq!(h.reconcile(&key).await.state, TRANSIENT);
    assert_eq!(h.ready(&key).reason, reasons::RENDER_FAILED);
}

#[tokio::test]
async fn test_source_without_artifact_is_transient() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.source.set_revision(None);

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, TRANSIENT);
    assert_eq!(h.renderer.calls(), 0);
    let status = h.status(&key);
    assert_eq!(status.last_attempted_revision, None);
    assert!(h.ready(&key).message.contains("no artifact"));
}

#[tokio::test]
async fn test_invalid_spec_is_reported_without_rendering() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.interval = "soon".to_string();
    let key = h.add(unit);

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, AttemptState::InvalidSpec);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(300)));
    let ready = h.ready(&key);
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, reasons::INVALID_SPEC);
    assert_eq!(h.renderer.calls(), 0);
}

#[tokio::test]
async fn test_suspended_is_a_no_op() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);
    h.reconcile(&key).await;
    let before = h.status(&key);
    let commits = h.store.commits();

    h.store.update(&key, |unit| unit.spec.suspend = true);
    h.source.set_revision(Some("main@sha1:bbbbbbb"));
    let report = h.reconcile(&key).await;

    assert_eq!(report.state, AttemptState::Suspended);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(300)));
    assert_eq!(h.status(&key), before);
    assert_eq!(h.store.commits(), commits);
    assert_eq!(h.renderer.calls(), 1);
}

#[tokio::test]
async fn test_suspended_unit_gets_no_finalizer() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.suspend = true;
    let key = h.add(unit);

    assert_eq!(h.reconcile(&key).await.state, AttemptState::Suspended);
    assert!(!h.unit(&key).has_finalizer(FINALIZER));
    assert!(h.unit(&key).status.is_none());
}

#[tokio::test]
async fn test_validation_failure_fails_only_that_object() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.validate = true;
    let key = h.add(unit);
    h.renderer.set_objects(vec![
        config_map("good", json!({"a": "1"})),
        config_map("bad", json!({"a": "1"})),
    ]);
    h.cluster.fail(
        "dry-run",
        "bad",
        ClusterError::Invalid("data.a: must be a string".to_string()),
    );

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, FATAL);
    assert!(h.cluster.object(NAMESPACE, "ConfigMap", "good").is_some());
    assert!(h.cluster.object(NAMESPACE, "ConfigMap", "bad").is_none());

    let ready = h.ready(&key);
    assert_eq!(ready.reason, reasons::VALIDATION_FAILED);
    assert!(ready.message.contains("ConfigMap/apps/bad"));
    let status = h.status(&key);
    assert_eq!(status.snapshot, None);
    assert_eq!(status.last_applied_revision, None);
}

#[tokio::test]
async fn test_apply_failure_keeps_snapshot_and_continues_other_objects() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![
        config_map("a", json!({"v": "1"})),
        config_map("b", json!({"v": "1"})),
    ]);
    h.reconcile(&key).await;
    let before = h.status(&key);

    h.source.set_revision(Some("main@sha1:bbbbbbb"));
    h.renderer.set_objects(vec![
        config_map("a", json!({"v": "2"})),
        config_map("b", json!({"v": "2"})),
        config_map("c", json!({"v": "2"})),
    ]);
    h.cluster.fail(
        "update",
        "a",
        ClusterError::Conflict("the object has been modified".to_string()),
    );

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, TRANSIENT);
    assert_eq!(report.requeue_after, Some(Duration::from_secs(60)));

    let ready = h.ready(&key);
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, reasons::APPLY_FAILED);
    assert!(ready.message.contains("ConfigMap/apps/a"));
    assert_eq!(h.cluster.object(NAMESPACE, "ConfigMap", "b").unwrap()["data"]["v"], "2");
    assert!(h.cluster.object(NAMESPACE, "ConfigMap", "c").is_some());

    let status = h.status(&key);
    assert_eq!(status.snapshot, before.snapshot);
    assert_eq!(status.last_applied_revision, before.last_applied_revision);

    h.cluster.clear_failures();
    assert_eq!(h.reconcile(&key).await.state, SUCCESS);
    let status = h.status(&key);
    assert_eq!(status.last_applied_revision.as_deref(), Some("main@sha1:bbbbbbb"));
    assert_eq!(status.snapshot.unwrap().resources.len(), 3);
}

#[tokio::test]
async fn test_unreadable_live_object_is_not_created() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);
    h.cluster.fail(
        "get",
        "settings",
        ClusterError::Unavailable("connection refused".to_string()),
    );

    assert_eq!(h.reconcile(&key).await.state, TRANSIENT);
    assert!(h.cluster.mutations().is_empty());
    assert_eq!(h.ready(&key).reason, reasons::APPLY_FAILED);
}

#[tokio::test]
async fn test_duplicate_objects_fail_render() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer.set_objects(vec![
        config_map("settings", json!({"a": "1"})),
        config_map("settings", json!({"a": "2"})),
    ]);

    assert_eq!(h.reconcile(&key).await.state, FATAL);
    let ready = h.ready(&key);
    assert_eq!(ready.reason, reasons::RENDER_FAILED);
    assert!(ready.message.contains("more than once"));
    assert!(h.cluster.mutations().is_empty());
}

#[tokio::test]
async fn test_object_without_name_fails_render() {
    let h = Harness::new();
    let key = h.add(konfiguration("podinfo"));
    h.renderer
        .set_objects(vec![json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}})]);

    assert_eq!(h.reconcile(&key).await.state, FATAL);
    assert_eq!(h.ready(&key).reason, reasons::RENDER_FAILED);
}

#[tokio::test]
async fn test_remote_path_uses_content_checksum_as_revision() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.source_ref = None;
    unit.spec.path = "https://example.com/deploy/app.jsonnet".to_string();
    let key = h.add(unit);
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);

    assert_eq!(h.reconcile(&key).await.state, SUCCESS);
    let revision = h.status(&key).last_applied_revision.unwrap();
    assert!(revision.starts_with("sha256:"));
    h.cluster.clear_mutations();

    assert_eq!(h.reconcile(&key).await.state, AttemptState::UpToDate);
    assert_eq!(h.renderer.calls(), 2);
    assert!(h.cluster.mutations().is_empty());

    h.renderer.set_objects(vec![config_map("settings", json!({"a": "2"}))]);
    assert_eq!(h.reconcile(&key).await.state, SUCCESS);
    assert_ne!(h.status(&key).last_applied_revision.unwrap(), revision);
}

#[tokio::test]
async fn test_remote_path_render_failure_records_attempt() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.source_ref = None;
    unit.spec.path = "https://example.com/deploy/app.jsonnet".to_string();
    let key = h.add(unit);
    h.renderer
        .set_outcome(RenderOutcome::Fatal("app.jsonnet:1:1 unknown variable".to_string()));

    assert_eq!(h.reconcile(&key).await.state, FATAL);
    let status = h.status(&key);
    assert_eq!(
        status.last_attempted_revision.as_deref(),
        Some("https://example.com/deploy/app.jsonnet")
    );
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.last_applied_revision, None);
}

#[tokio::test]
async fn test_remote_cluster_from_kubeconfig_secret() {
    let h = Harness::new();
    let mut unit = konfiguration("podinfo");
    unit.spec.kube_config = Some(KubeConfigReference {
        secret_ref: SecretReference {
            name: "prod-kubeconfig".to_string(),
        },
    });
    let key = h.add(unit);
    h.renderer.set_objects(vec![config_map("settings", json!({"a": "1"}))]);

    let report = h.reconcile(&key).await;
    assert_eq!(report.state, TRANSIENT);
    let ready = h.ready(&key);
    assert_eq!(ready.reason, reasons::APPLY_FAILED);
    assert!(ready.message.contains("prod-kubeconfig"));

    h.credentials.insert(NAMESPACE, "prod-kubeconfig", REMOTE_KUBECONFIG);
    assert_eq!(h.reconcile(&key).await.state, SUCCESS);
    assert_eq!(h.remote.len(), 1);
    assert_eq!(h.cluster.len(), 0);
}
