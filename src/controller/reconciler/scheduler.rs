//! # Scheduler
//!
//! One reconciliation attempt per call: gate, resolve, render, diff, apply,
//! prune and a single status commit at the end.
//!
//! ```text
//! suspended? -> validate -> dependencies ready? -> resolve source
//!     -> revision changed? -> render -> diff/apply -> prune -> commit
//! ```
//!
//! Every step after the dependency gate runs under the attempt deadline.
//! An attempt interrupted by deletion commits nothing; any other failure
//! leaves `lastAppliedRevision` and the snapshot untouched.

use crate::config::ControllerConfig;
use crate::constants;
use crate::controller::reconciler::apply;
use crate::controller::reconciler::attempt::{AttemptGuard, AttemptRegistry, Deadline};
use crate::controller::reconciler::dependency::{self, GateError, GateResult};
use crate::controller::reconciler::diff::{self, DesiredObject};
use crate::controller::reconciler::prune;
use crate::controller::reconciler::revision;
use crate::controller::reconciler::snapshot::checksum;
use crate::controller::reconciler::status::{self, StatusTracker};
use crate::controller::reconciler::store::UnitStore;
use crate::controller::reconciler::types::{
    AttemptReport, AttemptState, ExecutionReport, OperationKind, ReconcilerError,
};
use crate::controller::reconciler::validation::validate_konfiguration;
use crate::crd::{reasons, AttemptResult, ConditionStatus, Konfiguration, Snapshot};
use crate::observability::metrics;
use crate::provider::{
    ClusterClient, ClusterConnector, ClusterError, CredentialError, CredentialFetcher, ObjectKey,
    ObjectRef, RenderError, RenderRequest, Renderer, ResolvedSource, ResourceScope, SourceError,
    SourceResolver,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External systems an attempt talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn UnitStore>,
    pub sources: Arc<dyn SourceResolver>,
    pub renderer: Arc<dyn Renderer>,
    pub credentials: Arc<dyn CredentialFetcher>,
    pub connector: Arc<dyn ClusterConnector>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Fixed requeue while dependencies are not ready or form a cycle
    pub dependency_requeue: Duration,
    /// Failed cleanup attempts before the finalizer is released anyway
    pub max_cleanup_attempts: u32,
    /// Requeue for a Konfiguration whose spec cannot be acted on
    pub invalid_spec_requeue: Duration,
    /// Requeue after an attempt was skipped or interrupted
    pub busy_requeue: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for SchedulerSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            dependency_requeue: config.dependency_requeue(),
            max_cleanup_attempts: config.max_cleanup_attempts,
            invalid_spec_requeue: Duration::from_secs(
                constants::DEFAULT_INVALID_SPEC_REQUEUE_SECS,
            ),
            busy_requeue: Duration::from_secs(constants::DEFAULT_CANCELLED_REQUEUE_SECS),
        }
    }
}

/// Parsed timing of a Konfiguration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    pub retry_interval: Duration,
    pub timeout: Duration,
}

impl Schedule {
    pub fn for_unit(unit: &Konfiguration) -> anyhow::Result<Self> {
        Ok(Self {
            interval: unit.interval()?,
            retry_interval: unit.retry_interval()?,
            timeout: unit.timeout()?,
        })
    }

    fn requeue_for(&self, result: AttemptResult) -> Duration {
        match result {
            AttemptResult::Success => self.interval,
            AttemptResult::TransientFailure | AttemptResult::FatalFailure => self.retry_interval,
        }
    }
}

/// Why a cluster client could not be built
pub(super) enum ConnectFailure {
    Cancelled,
    Failed { result: AttemptResult, message: String },
}

/// Why the rendered manifests could not be turned into desired objects
enum PrepareFailure {
    Cancelled,
    Failed {
        result: AttemptResult,
        reason: &'static str,
        message: String,
    },
}

#[derive(Debug)]
pub struct Scheduler {
    pub(super) collaborators: Collaborators,
    pub(super) registry: AttemptRegistry,
    pub(super) settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(collaborators: Collaborators, settings: SchedulerSettings) -> Self {
        Self {
            collaborators,
            registry: AttemptRegistry::new(),
            settings,
        }
    }

    /// In-flight attempts, shared with the deletion watch
    pub fn registry(&self) -> &AttemptRegistry {
        &self.registry
    }

    /// Run one attempt for `unit`
    pub async fn reconcile(&self, unit: &Konfiguration) -> Result<AttemptReport, ReconcilerError> {
        if unit.is_being_deleted() {
            return self.finalize(unit).await;
        }

        let key = unit.key();
        let Some(guard) = self.registry.try_begin(&key) else {
            debug!("Attempt for {} already in flight, skipping", key);
            return Ok(AttemptReport::requeue(
                AttemptState::Busy,
                self.settings.busy_requeue,
            ));
        };

        if unit.spec.suspend {
            info!("Konfiguration {} is suspended, skipping", key);
            let requeue = unit.interval().unwrap_or(self.settings.invalid_spec_requeue);
            return Ok(AttemptReport::requeue(AttemptState::Suspended, requeue));
        }

        if !unit.has_finalizer(constants::FINALIZER) {
            self.collaborators
                .store
                .set_finalizer(&key, constants::FINALIZER, true)
                .await?;
        }

        let schedule = match validate_konfiguration(unit).and_then(|()| Schedule::for_unit(unit)) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!("Konfiguration {} is invalid: {}", key, e);
                let requeue = self.settings.invalid_spec_requeue;
                let mut tracker = StatusTracker::new(unit, Utc::now());
                tracker.ready(ConditionStatus::False, reasons::INVALID_SPEC, e.to_string());
                status::commit(
                    self.collaborators.store.as_ref(),
                    unit,
                    &tracker.finish(requeue),
                )
                .await?;
                return Ok(AttemptReport::requeue(AttemptState::InvalidSpec, requeue));
            }
        };

        let gate = match dependency::is_ready(unit, self.collaborators.store.as_ref(), guard.token())
            .await
        {
            Ok(gate) => gate,
            Err(GateError::Cancelled) => return Ok(self.cancelled()),
            Err(GateError::Store(e)) => return Err(e.into()),
        };
        metrics::increment_dependency_gate_total(gate.as_str());
        match gate {
            GateResult::Ready => {}
            GateResult::NotReady(message) => {
                info!("Konfiguration {} waiting on dependencies: {}", key, message);
                return self
                    .gated(unit, ConditionStatus::Unknown, reasons::DEPENDENCY_NOT_READY, message)
                    .await
                    .map(|requeue| AttemptReport::requeue(AttemptState::DependencyNotReady, requeue));
            }
            GateResult::Cycle(path) => {
                let message = format!("dependency cycle: {}", dependency::describe_cycle(&path));
                warn!("Konfiguration {}: {}", key, message);
                return self
                    .gated(unit, ConditionStatus::False, reasons::DEPENDENCY_CYCLE, message)
                    .await
                    .map(|requeue| AttemptReport::requeue(AttemptState::DependencyCycle, requeue));
            }
        }

        self.attempt(unit, schedule, &guard).await
    }

    /// Commit a dependency gate condition, leaving everything else untouched
    async fn gated(
        &self,
        unit: &Konfiguration,
        condition: ConditionStatus,
        reason: &str,
        message: String,
    ) -> Result<Duration, ReconcilerError> {
        let requeue = self.settings.dependency_requeue;
        let mut tracker = StatusTracker::new(unit, Utc::now());
        tracker.ready(condition, reason, message);
        status::commit(
            self.collaborators.store.as_ref(),
            unit,
            &tracker.finish(requeue),
        )
        .await?;
        Ok(requeue)
    }

    async fn attempt(
        &self,
        unit: &Konfiguration,
        schedule: Schedule,
        guard: &AttemptGuard,
    ) -> Result<AttemptReport, ReconcilerError> {
        let deadline = Deadline::start(guard.token(), schedule.timeout);
        let mut tracker = StatusTracker::new(unit, Utc::now());
        let trigger = unit.reconcile_requested_at();

        let source = match unit.source_ref() {
            Some(source_ref) => {
                match self
                    .collaborators
                    .sources
                    .resolve(&source_ref, deadline.token())
                    .await
                {
                    Ok(source) => Some(source),
                    Err(SourceError::Cancelled) => {
                        return self
                            .stopped(unit, &deadline, tracker, schedule, "source resolution")
                            .await;
                    }
                    Err(e) => {
                        tracker
                            .result(AttemptResult::TransientFailure)
                            .ready(ConditionStatus::False, reasons::RENDER_FAILED, e.to_string());
                        return self
                            .conclude(unit, tracker, AttemptResult::TransientFailure, schedule)
                            .await;
                    }
                }
            }
            None => None,
        };

        if let Some(source) = &source {
            if !revision::should_render(unit, &source.revision) {
                debug!(
                    "Revision {} of {} already applied, skipping render",
                    source.revision,
                    unit.key()
                );
                return Ok(AttemptReport::requeue(AttemptState::UpToDate, schedule.interval));
            }
        }

        let manifests = match self.render(unit, source.as_ref(), &deadline).await {
            Ok(manifests) => manifests,
            Err(RenderError::Cancelled) => {
                return self.stopped(unit, &deadline, tracker, schedule, "render").await;
            }
            Err(e) => {
                let result = match e {
                    RenderError::Failed(_) => AttemptResult::FatalFailure,
                    _ => AttemptResult::TransientFailure,
                };
                // Without a source the manifest checksum is unknown, record the path
                let attempted = source
                    .as_ref()
                    .map_or(unit.spec.path.as_str(), |source| source.revision.as_str());
                tracker
                    .attempted(attempted, trigger)
                    .result(result)
                    .ready(ConditionStatus::False, reasons::RENDER_FAILED, e.to_string());
                return self.conclude(unit, tracker, result, schedule).await;
            }
        };

        let manifest_checksum = checksum(&manifests);
        let revision = match &source {
            Some(source) => source.revision.clone(),
            None => {
                if !revision::should_render(unit, &manifest_checksum) {
                    debug!("Rendered output of {} unchanged, skipping apply", unit.key());
                    return Ok(AttemptReport::requeue(AttemptState::UpToDate, schedule.interval));
                }
                manifest_checksum.clone()
            }
        };
        tracing::Span::current().record("revision", revision.as_str());
        tracker.attempted(&revision, trigger);

        let client = match self.connect(unit, deadline.token()).await {
            Ok(client) => client,
            Err(ConnectFailure::Cancelled) => {
                return self.stopped(unit, &deadline, tracker, schedule, "connect").await;
            }
            Err(ConnectFailure::Failed { result, message }) => {
                tracker
                    .result(result)
                    .ready(ConditionStatus::False, reasons::APPLY_FAILED, message);
                return self.conclude(unit, tracker, result, schedule).await;
            }
        };

        let desired = match prepare(client.as_ref(), unit, manifests, deadline.token()).await {
            Ok(desired) => desired,
            Err(PrepareFailure::Cancelled) => {
                return self.stopped(unit, &deadline, tracker, schedule, "apply").await;
            }
            Err(PrepareFailure::Failed {
                result,
                reason,
                message,
            }) => {
                tracker
                    .result(result)
                    .ready(ConditionStatus::False, reason, message);
                return self.conclude(unit, tracker, result, schedule).await;
            }
        };

        let mut report = ExecutionReport::default();
        let live = fetch_live(client.as_ref(), &desired, deadline.token(), &mut report).await;
        let prior = tracker
            .snapshot()
            .map(Snapshot::applied_configs)
            .unwrap_or_default();
        let unreadable: HashSet<ObjectKey> = report
            .failed
            .iter()
            .map(|failure| failure.object.key())
            .chain(report.aborted.iter().map(|object| object.key()))
            .collect();
        let readable: Vec<DesiredObject> = desired
            .iter()
            .filter(|item| !unreadable.contains(&item.object.key()))
            .cloned()
            .collect();
        let operations = diff::diff(unit.spec.diff_strategy, &readable, &live, &prior);
        info!(
            "Applying revision {} of {}: {} objects, {} changes",
            revision,
            unit.key(),
            desired.len(),
            operations.len()
        );
        report.merge(
            apply::execute(
                client.as_ref(),
                &operations,
                unit.spec.validate,
                deadline.token(),
            )
            .await,
        );

        if deadline.is_interrupted() {
            return Ok(self.cancelled());
        }

        if !report.is_success() {
            let result = report.result();
            let reason = if report.is_aborted() || deadline.is_expired() {
                reasons::TIMEOUT
            } else if apply::validation_failures(&report) == report.failed.len() {
                reasons::VALIDATION_FAILED
            } else {
                reasons::APPLY_FAILED
            };
            warn!("Apply of {} failed: {}", unit.key(), report.summary());
            tracker
                .result(result)
                .ready(ConditionStatus::False, reason, report.summary());
            return self.conclude(unit, tracker, result, schedule).await;
        }

        if unit.spec.prune {
            let desired_keys: HashSet<ObjectKey> =
                desired.iter().map(|item| item.object.key()).collect();
            let stale = tracker
                .snapshot()
                .map(|prior| prune::stale_resources(prior, &desired_keys))
                .unwrap_or_default();
            let pruned = prune::prune(client.as_ref(), &stale, deadline.token()).await;

            if deadline.is_interrupted() {
                return Ok(self.cancelled());
            }
            if !pruned.is_success() {
                warn!("Prune of {} failed: {}", unit.key(), pruned.summary());
                let message = format!("applied revision {revision}, prune failed: {}", pruned.summary());
                // Keep what was just applied and what is still left to delete
                let mut resources = Snapshot::from_applied(String::new(), &desired).resources;
                resources.extend(prune::remaining(&stale, &pruned));
                tracker
                    .replace_snapshot(Some(Snapshot::from_resources(manifest_checksum, resources)))
                    .result(AttemptResult::TransientFailure)
                    .ready(ConditionStatus::True, reasons::PRUNE_FAILED, message);
                return self
                    .conclude(unit, tracker, AttemptResult::TransientFailure, schedule)
                    .await;
            }
        }

        tracker
            .succeeded(&revision, Snapshot::from_applied(manifest_checksum, &desired))
            .ready(
                ConditionStatus::True,
                reasons::RECONCILIATION_SUCCEEDED,
                format!("Applied revision: {revision}"),
            );
        info!("Reconciled {} at revision {}", unit.key(), revision);
        self.conclude(unit, tracker, AttemptResult::Success, schedule)
            .await
    }

    async fn render(
        &self,
        unit: &Konfiguration,
        source: Option<&ResolvedSource>,
        deadline: &Deadline,
    ) -> Result<Vec<Value>, RenderError> {
        let variables = unit.variables();
        let request = RenderRequest {
            path: &unit.spec.path,
            content_root: source.map(|source| source.content.as_path()),
            revision: source.map_or("", |source| source.revision.as_str()),
            variables: &variables,
            extra_args: &unit.spec.kubecfg_args,
        };
        self.collaborators
            .renderer
            .render(request, deadline.token())
            .await
    }

    /// Client for the cluster `unit` targets
    pub(super) async fn connect(
        &self,
        unit: &Konfiguration,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ClusterClient>, ConnectFailure> {
        let kubeconfig = match &unit.spec.kube_config {
            Some(reference) => {
                let fetched = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ConnectFailure::Cancelled),
                    fetched = self.collaborators.credentials.fetch(
                        &reference.secret_ref.name,
                        unit.namespace_or_default(),
                    ) => fetched,
                };
                // The secret may still be created, so a missing one is transient
                let bytes = fetched.map_err(|e: CredentialError| ConnectFailure::Failed {
                    result: AttemptResult::TransientFailure,
                    message: e.to_string(),
                })?;
                let text = String::from_utf8(bytes).map_err(|e| ConnectFailure::Failed {
                    result: AttemptResult::FatalFailure,
                    message: format!(
                        "kubeconfig secret {} is not valid UTF-8: {e}",
                        reference.secret_ref.name
                    ),
                })?;
                Some(text)
            }
            None => None,
        };

        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConnectFailure::Cancelled),
            connected = self.collaborators.connector.connect(kubeconfig.as_deref()) => connected,
        };
        connected.map_err(|e| ConnectFailure::Failed {
            result: if e.is_retryable() {
                AttemptResult::TransientFailure
            } else {
                AttemptResult::FatalFailure
            },
            message: format!("failed to connect to target cluster: {e}"),
        })
    }

    /// Requeue after an interruption; nothing is committed
    pub(super) fn cancelled(&self) -> AttemptReport {
        info!("Attempt interrupted, discarding its results");
        AttemptReport::requeue(AttemptState::Cancelled, self.settings.busy_requeue)
    }

    /// A step stopped because its token fired: either the attempt was
    /// interrupted or the deadline expired
    async fn stopped(
        &self,
        unit: &Konfiguration,
        deadline: &Deadline,
        mut tracker: StatusTracker,
        schedule: Schedule,
        stage: &str,
    ) -> Result<AttemptReport, ReconcilerError> {
        if deadline.is_interrupted() {
            return Ok(self.cancelled());
        }
        let message = format!(
            "{stage} did not complete within timeout of {}s",
            schedule.timeout.as_secs()
        );
        warn!("Konfiguration {}: {}", unit.key(), message);
        tracker
            .result(AttemptResult::TransientFailure)
            .ready(ConditionStatus::False, reasons::TIMEOUT, message);
        self.conclude(unit, tracker, AttemptResult::TransientFailure, schedule)
            .await
    }

    /// Commit the attempt's status in one write
    async fn conclude(
        &self,
        unit: &Konfiguration,
        tracker: StatusTracker,
        result: AttemptResult,
        schedule: Schedule,
    ) -> Result<AttemptReport, ReconcilerError> {
        if result != AttemptResult::Success {
            metrics::increment_reconciliation_errors();
        }
        let requeue = schedule.requeue_for(result);
        status::commit(
            self.collaborators.store.as_ref(),
            unit,
            &tracker.finish(requeue),
        )
        .await?;
        Ok(AttemptReport::requeue(AttemptState::Completed(result), requeue))
    }
}

/// Give each rendered manifest an identity, defaulting the namespace of
/// namespaced objects to the Konfiguration's own
async fn prepare(
    client: &dyn ClusterClient,
    unit: &Konfiguration,
    manifests: Vec<Value>,
    cancel: &CancellationToken,
) -> Result<Vec<DesiredObject>, PrepareFailure> {
    let mut scopes: HashMap<(String, String), ResourceScope> = HashMap::new();
    let mut seen: HashSet<ObjectKey> = HashSet::new();
    let mut desired = Vec::with_capacity(manifests.len());

    for (index, mut manifest) in manifests.into_iter().enumerate() {
        let Some(mut object) = ObjectRef::from_manifest(&manifest) else {
            return Err(PrepareFailure::Failed {
                result: AttemptResult::FatalFailure,
                reason: reasons::RENDER_FAILED,
                message: format!(
                    "rendered object #{index} is missing apiVersion, kind or metadata.name"
                ),
            });
        };

        let scope_key = (object.api_version.clone(), object.kind.clone());
        let scope = match scopes.get(&scope_key) {
            Some(scope) => *scope,
            None => {
                let looked_up = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(PrepareFailure::Cancelled),
                    scope = client.scope(&object.api_version, &object.kind) => scope,
                };
                let scope = looked_up.map_err(|e| PrepareFailure::Failed {
                    result: if e.is_retryable() {
                        AttemptResult::TransientFailure
                    } else {
                        AttemptResult::FatalFailure
                    },
                    reason: reasons::APPLY_FAILED,
                    message: format!("failed to resolve {} {}: {e}", object.api_version, object.kind),
                })?;
                scopes.insert(scope_key, scope);
                scope
            }
        };

        match scope {
            ResourceScope::Namespaced if object.namespace.is_none() => {
                let namespace = unit.namespace_or_default();
                if let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
                    metadata.insert("namespace".to_string(), Value::from(namespace));
                }
                object.namespace = Some(namespace.to_string());
            }
            ResourceScope::ClusterWide if object.namespace.is_some() => {
                if let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
                    metadata.remove("namespace");
                }
                object.namespace = None;
            }
            _ => {}
        }

        if !seen.insert(object.key()) {
            return Err(PrepareFailure::Failed {
                result: AttemptResult::FatalFailure,
                reason: reasons::RENDER_FAILED,
                message: format!("rendered output contains {object} more than once"),
            });
        }
        desired.push(DesiredObject { object, manifest });
    }

    Ok(desired)
}

/// Live state of every desired object. Objects that could not be read are
/// recorded in `report` and left out of the result.
async fn fetch_live(
    client: &dyn ClusterClient,
    desired: &[DesiredObject],
    cancel: &CancellationToken,
    report: &mut ExecutionReport,
) -> HashMap<ObjectKey, Value> {
    let mut live = HashMap::new();
    for item in desired {
        if cancel.is_cancelled() {
            report.aborted.push(item.object.clone());
            continue;
        }
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                report.aborted.push(item.object.clone());
                continue;
            }
            fetched = client.get(&item.object) => fetched,
        };
        match fetched {
            Ok(object) => {
                live.insert(item.object.key(), object);
            }
            Err(ClusterError::NotFound) => {}
            Err(e) => report.record_failure(OperationKind::Get, item.object.clone(), &e),
        }
    }
    live
}

/// Resources of the snapshot `unit` last committed
pub(super) fn committed_snapshot(unit: &Konfiguration) -> Option<&Snapshot> {
    unit.status
        .as_ref()
        .and_then(|status| status.snapshot.as_ref())
        .filter(|snapshot| !snapshot.is_empty())
}
