//! # Pruner
//!
//! Garbage collection of objects recorded in the prior snapshot that are no
//! longer part of the desired set.

use crate::controller::reconciler::apply;
use crate::controller::reconciler::types::{ExecutionReport, Operation};
use crate::crd::{Snapshot, SnapshotResource};
use crate::observability::metrics;
use crate::provider::{ClusterClient, ObjectKey};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Prior resources absent from the desired set, in prior snapshot order
pub fn stale_resources(prior: &Snapshot, desired: &HashSet<ObjectKey>) -> Vec<SnapshotResource> {
    prior
        .resources
        .iter()
        .filter(|resource| !desired.contains(&resource.key()))
        .cloned()
        .collect()
}

/// Delete operations for the given resources, in reverse order
pub fn delete_operations(resources: &[SnapshotResource]) -> Vec<Operation> {
    resources
        .iter()
        .rev()
        .map(|resource| Operation::delete(resource.object_ref()))
        .collect()
}

/// Delete every resource in `resources`, last first
pub async fn prune(
    client: &dyn ClusterClient,
    resources: &[SnapshotResource],
    deadline: &CancellationToken,
) -> ExecutionReport {
    if resources.is_empty() {
        return ExecutionReport::default();
    }
    let operations = delete_operations(resources);
    let report = apply::execute(client, &operations, false, deadline).await;
    if !report.succeeded.is_empty() {
        info!("Pruned {} objects", report.succeeded.len());
        metrics::increment_pruned(report.succeeded.len());
    }
    report
}

/// Keys of the resources a prune could not remove
pub fn outstanding(report: &ExecutionReport) -> HashSet<ObjectKey> {
    report
        .failed
        .iter()
        .map(|failure| failure.object.key())
        .chain(report.aborted.iter().map(|object| object.key()))
        .collect()
}

/// Resources of `stale` a prune could not remove, in their original order
pub fn remaining(stale: &[SnapshotResource], report: &ExecutionReport) -> Vec<SnapshotResource> {
    let outstanding = outstanding(report);
    stale
        .iter()
        .filter(|resource| outstanding.contains(&resource.key()))
        .cloned()
        .collect()
}
