//! In-memory collaborators for driving the scheduler without a cluster

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use konfiguration_controller::controller::reconciler::diff::apply_merge_patch;
use konfiguration_controller::controller::reconciler::{
    AttemptReport, Collaborators, Scheduler, SchedulerSettings, StoreError, UnitStore,
};
use konfiguration_controller::crd::{
    Condition, CrossNamespaceSourceReference, DiffStrategy, Konfiguration, KonfigurationSpec,
    KonfigurationStatus, SourceKind, UnitKey, CONDITION_READY,
};
use konfiguration_controller::provider::{
    ClusterClient, ClusterConnector, ClusterError, CredentialError, CredentialFetcher, ObjectKey,
    ObjectRef, RenderError, RenderRequest, Renderer, ResolvedSource, ResourceScope, SourceError,
    SourceResolver,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "apps";
pub const REMOTE_KUBECONFIG: &str = "apiVersion: v1\nkind: Config\n# remote\n";

const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
];

/// Cluster backed by a map, applying merge patches like the API server
#[derive(Debug, Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    /// (operation, object name) -> error returned until cleared
    failures: Mutex<HashMap<(String, String), ClusterError>>,
    mutations: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    versions: AtomicU64,
}

impl FakeCluster {
    /// Fail every `operation` ("get", "create", "update", "delete" or
    /// "dry-run") on objects called `name`
    pub fn fail(&self, operation: &str, name: &str, error: ClusterError) {
        self.failures
            .lock()
            .unwrap()
            .insert((operation.to_string(), name.to_string()), error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Create/update/delete calls that changed state, in order
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn clear_mutations(&self) {
        self.mutations.lock().unwrap().clear();
    }

    pub fn object(&self, namespace: &str, kind: &str, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(namespace, kind, name))
            .cloned()
    }

    pub fn objects(&self) -> BTreeMap<ObjectKey, Value> {
        self.objects.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Seed an object as if another actor had created it
    pub fn insert(&self, manifest: Value) {
        let object = ObjectRef::from_manifest(&manifest).unwrap();
        self.objects.lock().unwrap().insert(object.key(), manifest);
    }

    /// Mutate a live object as if another actor had patched it
    pub fn patch(&self, namespace: &str, kind: &str, name: &str, patch: &Value) {
        let mut objects = self.objects.lock().unwrap();
        let live = objects.get_mut(&key(namespace, kind, name)).unwrap();
        apply_merge_patch(live, patch);
    }

    async fn step(&self, operation: &str, object: &ObjectRef) -> Result<(), ClusterError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failures = self.failures.lock().unwrap();
        match failures.get(&(operation.to_string(), object.name.clone())) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, operation: &str, object: &ObjectRef) {
        self.mutations
            .lock()
            .unwrap()
            .push(format!("{operation} {object}"));
    }

    fn next_version(&self) -> String {
        (self.versions.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

pub fn key(namespace: &str, kind: &str, name: &str) -> ObjectKey {
    ObjectKey {
        namespace: namespace.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn scope(&self, _api_version: &str, kind: &str) -> Result<ResourceScope, ClusterError> {
        Ok(if CLUSTER_SCOPED_KINDS.contains(&kind) {
            ResourceScope::ClusterWide
        } else {
            ResourceScope::Namespaced
        })
    }

    async fn get(&self, object: &ObjectRef) -> Result<Value, ClusterError> {
        self.step("get", object).await?;
        self.objects
            .lock()
            .unwrap()
            .get(&object.key())
            .cloned()
            .ok_or(ClusterError::NotFound)
    }

    async fn create(
        &self,
        object: &ObjectRef,
        payload: &Value,
        dry_run: bool,
    ) -> Result<Value, ClusterError> {
        self.step(if dry_run { "dry-run" } else { "create" }, object)
            .await?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&object.key()) {
            return Err(ClusterError::Conflict(format!("{object} already exists")));
        }
        let mut created = payload.clone();
        created["metadata"]["uid"] = json!(format!("uid-{}", object.name));
        created["metadata"]["resourceVersion"] = json!(self.next_version());
        created["metadata"]["creationTimestamp"] = json!("2026-01-01T00:00:00Z");
        if object.kind == "Service" && created.pointer("/spec/clusterIP").is_none() {
            created["spec"]["clusterIP"] = json!("10.96.0.10");
        }
        if dry_run {
            return Ok(created);
        }
        objects.insert(object.key(), created.clone());
        drop(objects);
        self.record("create", object);
        Ok(created)
    }

    async fn update(
        &self,
        object: &ObjectRef,
        patch: &Value,
        dry_run: bool,
    ) -> Result<Value, ClusterError> {
        self.step(if dry_run { "dry-run" } else { "update" }, object)
            .await?;
        let mut objects = self.objects.lock().unwrap();
        let live = objects.get(&object.key()).ok_or(ClusterError::NotFound)?;
        let mut patched = live.clone();
        apply_merge_patch(&mut patched, patch);
        if dry_run || patched == *live {
            return Ok(patched);
        }
        patched["metadata"]["resourceVersion"] = json!(self.next_version());
        objects.insert(object.key(), patched.clone());
        drop(objects);
        self.record("update", object);
        Ok(patched)
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), ClusterError> {
        self.step("delete", object).await?;
        let removed = self.objects.lock().unwrap().remove(&object.key());
        match removed {
            Some(_) => {
                self.record("delete", object);
                Ok(())
            }
            None => Err(ClusterError::NotFound),
        }
    }
}

/// Connects to the local fake, or to the remote fake for `REMOTE_KUBECONFIG`
#[derive(Debug)]
pub struct FakeConnector {
    pub local: Arc<FakeCluster>,
    pub remote: Arc<FakeCluster>,
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(
        &self,
        kubeconfig: Option<&str>,
    ) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        match kubeconfig {
            None => Ok(self.local.clone()),
            Some(REMOTE_KUBECONFIG) => Ok(self.remote.clone()),
            Some(_) => Err(ClusterError::Invalid("unreadable kubeconfig".to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeCredentials {
    secrets: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl FakeCredentials {
    pub fn insert(&self, namespace: &str, name: &str, kubeconfig: &str) {
        self.secrets.lock().unwrap().insert(
            (namespace.to_string(), name.to_string()),
            kubeconfig.as_bytes().to_vec(),
        );
    }
}

#[async_trait]
impl CredentialFetcher for FakeCredentials {
    async fn fetch(&self, secret_name: &str, namespace: &str) -> Result<Vec<u8>, CredentialError> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), secret_name.to_string()))
            .cloned()
            .ok_or_else(|| CredentialError::NotFound {
                namespace: namespace.to_string(),
                name: secret_name.to_string(),
            })
    }
}

/// What the fake renderer produces
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Objects(Vec<Value>),
    Fatal(String),
    Unavailable(String),
}

#[derive(Debug)]
pub struct FakeRenderer {
    outcome: Mutex<RenderOutcome>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl Default for FakeRenderer {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(RenderOutcome::Objects(Vec::new())),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeRenderer {
    pub fn set_objects(&self, objects: Vec<Value>) {
        *self.outcome.lock().unwrap() = RenderOutcome::Objects(objects);
    }

    pub fn set_outcome(&self, outcome: RenderOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(
        &self,
        _request: RenderRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RenderError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
        match self.outcome.lock().unwrap().clone() {
            RenderOutcome::Objects(objects) => Ok(objects),
            RenderOutcome::Fatal(message) => Err(RenderError::Failed(message)),
            RenderOutcome::Unavailable(message) => Err(RenderError::Unavailable(message)),
        }
    }
}

/// Source whose revision is set by the test; `None` means not ready
#[derive(Debug)]
pub struct FakeSource {
    revision: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self {
            revision: Mutex::new(Some("main@sha1:aaaaaaa".to_string())),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeSource {
    pub fn set_revision(&self, revision: Option<&str>) {
        *self.revision.lock().unwrap() = revision.map(str::to_string);
    }
}

#[async_trait]
impl SourceResolver for FakeSource {
    async fn resolve(
        &self,
        source: &CrossNamespaceSourceReference,
        _cancel: &CancellationToken,
    ) -> Result<ResolvedSource, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.revision.lock().unwrap().clone() {
            Some(revision) => Ok(ResolvedSource {
                content: PathBuf::from("/cache/gitrepository/apps/repo"),
                revision,
            }),
            None => Err(SourceError::NotReady(format!("{} {}", source.kind, source.name))),
        }
    }
}

/// Konfiguration store; deleting marks the object and finalizers gate its removal
#[derive(Debug, Default)]
pub struct FakeStore {
    units: Mutex<BTreeMap<UnitKey, Konfiguration>>,
    commits: AtomicUsize,
}

impl FakeStore {
    pub fn insert(&self, unit: Konfiguration) {
        self.units.lock().unwrap().insert(unit.key(), unit);
    }

    pub fn unit(&self, key: &UnitKey) -> Option<Konfiguration> {
        self.units.lock().unwrap().get(key).cloned()
    }

    pub fn update(&self, key: &UnitKey, change: impl FnOnce(&mut Konfiguration)) {
        let mut units = self.units.lock().unwrap();
        change(units.get_mut(key).unwrap());
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Request deletion like the API server: removed at once without finalizers
    pub fn delete(&self, key: &UnitKey) {
        let mut units = self.units.lock().unwrap();
        let unit = units.get_mut(key).unwrap();
        if unit.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            units.remove(key);
            return;
        }
        unit.metadata.deletion_timestamp = Some(deletion_time());
    }
}

fn deletion_time() -> Time {
    serde_json::from_value(json!("2026-01-01T00:00:00Z")).unwrap()
}

#[async_trait]
impl UnitStore for FakeStore {
    async fn get(&self, key: &UnitKey) -> Result<Option<Konfiguration>, StoreError> {
        Ok(self.unit(key))
    }

    /// Merges the patch into the stored status like the API server does
    async fn commit_status(&self, key: &UnitKey, patch: &Value) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(unit) = self.units.lock().unwrap().get_mut(key) {
            let mut stored = json!({ "status": unit.status });
            apply_merge_patch(&mut stored, patch);
            let status: Option<KonfigurationStatus> =
                serde_json::from_value(stored["status"].take()).unwrap();
            unit.status = status;
        }
        Ok(())
    }

    async fn set_finalizer(
        &self,
        key: &UnitKey,
        finalizer: &str,
        present: bool,
    ) -> Result<(), StoreError> {
        let mut units = self.units.lock().unwrap();
        let Some(unit) = units.get_mut(key) else {
            return Ok(());
        };
        let finalizers = unit.metadata.finalizers.get_or_insert_with(Vec::new);
        finalizers.retain(|f| f != finalizer);
        if present {
            finalizers.push(finalizer.to_string());
        }
        if finalizers.is_empty() && unit.metadata.deletion_timestamp.is_some() {
            units.remove(key);
        }
        Ok(())
    }
}

/// Scheduler wired to fakes
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub cluster: Arc<FakeCluster>,
    pub remote: Arc<FakeCluster>,
    pub renderer: Arc<FakeRenderer>,
    pub source: Arc<FakeSource>,
    pub credentials: Arc<FakeCredentials>,
    pub scheduler: Arc<Scheduler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SchedulerSettings {
            dependency_requeue: Duration::from_secs(30),
            max_cleanup_attempts: 3,
            invalid_spec_requeue: Duration::from_secs(300),
            busy_requeue: Duration::from_secs(1),
        })
    }

    pub fn with_settings(settings: SchedulerSettings) -> Self {
        let store = Arc::new(FakeStore::default());
        let cluster = Arc::new(FakeCluster::default());
        let remote = Arc::new(FakeCluster::default());
        let renderer = Arc::new(FakeRenderer::default());
        let source = Arc::new(FakeSource::default());
        let credentials = Arc::new(FakeCredentials::default());
        let collaborators = Collaborators {
            store: store.clone(),
            sources: source.clone(),
            renderer: renderer.clone(),
            credentials: credentials.clone(),
            connector: Arc::new(FakeConnector {
                local: cluster.clone(),
                remote: remote.clone(),
            }),
        };
        Self {
            store,
            cluster,
            remote,
            renderer,
            source,
            credentials,
            scheduler: Arc::new(Scheduler::new(collaborators, settings)),
        }
    }

    pub fn add(&self, unit: Konfiguration) -> UnitKey {
        let key = unit.key();
        self.store.insert(unit);
        key
    }

    pub fn unit(&self, key: &UnitKey) -> Konfiguration {
        self.store.unit(key).unwrap()
    }

    pub fn status(&self, key: &UnitKey) -> KonfigurationStatus {
        self.unit(key).status.unwrap_or_default()
    }

    pub fn ready(&self, key: &UnitKey) -> Condition {
        self.status(key).condition(CONDITION_READY).cloned().unwrap()
    }

    /// Run one attempt against the stored state of `key`
    pub async fn reconcile(&self, key: &UnitKey) -> AttemptReport {
        let unit = self.unit(key);
        self.scheduler.reconcile(&unit).await.unwrap()
    }

    /// Request a manual reconciliation through the annotation
    pub fn request_reconcile(&self, key: &UnitKey, at: &str) {
        self.store.update(key, |unit| {
            unit.metadata.annotations.get_or_insert_with(Default::default).insert(
                konfiguration_controller::crd::RECONCILE_REQUESTED_ANNOTATION.to_string(),
                at.to_string(),
            );
        });
    }
}

pub fn konfiguration(name: &str) -> Konfiguration {
    let mut unit = Konfiguration::new(
        name,
        KonfigurationSpec {
            path: "deploy/main.jsonnet".to_string(),
            source_ref: Some(CrossNamespaceSourceReference {
                kind: SourceKind::GitRepository,
                name: "repo".to_string(),
                namespace: None,
            }),
            variables: None,
            kubecfg_args: Vec::new(),
            diff_strategy: DiffStrategy::Subset,
            prune: true,
            validate: false,
            suspend: false,
            interval: "5m".to_string(),
            retry_interval: Some("1m".to_string()),
            timeout: None,
            depends_on: Vec::new(),
            kube_config: None,
        },
    );
    unit.metadata.namespace = Some(NAMESPACE.to_string());
    unit.metadata.generation = Some(1);
    unit
}

pub fn config_map(name: &str, data: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name},
        "data": data
    })
}

pub fn namespace(name: &str) -> Value {
    json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}})
}

pub fn service(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "labels": {"app": name}},
        "spec": {"ports": [{"port": 80}], "selector": {"app": name}}
    })
}
