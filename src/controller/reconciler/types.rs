//! # Types
//!
//! Operations, execution reports and errors shared by the reconciliation engines.

use crate::controller::backoff::FibonacciBackoff;
use crate::crd::AttemptResult;
use crate::provider::{ClusterError, ObjectRef};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Kind of cluster operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Read of the live object ahead of diffing
    Get,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Get => "get",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cluster operation produced by the diff engine or the pruner
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub object: ObjectRef,
    /// Full object for creates, merge patch for updates, null for deletes
    pub payload: Value,
}

impl Operation {
    pub fn create(object: ObjectRef, manifest: Value) -> Self {
        Self {
            kind: OperationKind::Create,
            object,
            payload: manifest,
        }
    }

    pub fn update(object: ObjectRef, patch: Value) -> Self {
        Self {
            kind: OperationKind::Update,
            object,
            payload: patch,
        }
    }

    pub fn delete(object: ObjectRef) -> Self {
        Self {
            kind: OperationKind::Delete,
            object,
            payload: Value::Null,
        }
    }
}

/// An operation that did not succeed
#[derive(Debug, Clone, PartialEq)]
pub struct FailedOperation {
    pub kind: OperationKind,
    pub object: ObjectRef,
    pub message: String,
    pub retryable: bool,
    /// Rejected by the validation pre-check rather than by the real call
    pub validation: bool,
}

impl fmt::Display for FailedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.object, self.message)
    }
}

/// Per-operation outcomes of one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub succeeded: Vec<ObjectRef>,
    pub failed: Vec<FailedOperation>,
    /// Not started, or cancelled in flight, because the deadline expired
    pub aborted: Vec<ObjectRef>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_empty()
    }

    pub fn is_aborted(&self) -> bool {
        !self.aborted.is_empty()
    }

    pub fn record_failure(&mut self, kind: OperationKind, object: ObjectRef, error: &ClusterError) {
        self.failed.push(FailedOperation {
            kind,
            object,
            message: error.to_string(),
            retryable: error.is_retryable(),
            validation: false,
        });
    }

    pub fn merge(&mut self, other: ExecutionReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.aborted.extend(other.aborted);
    }

    /// Terminal result: aborted or retryable failures are transient,
    /// otherwise any failure is fatal
    pub fn result(&self) -> AttemptResult {
        if self.is_success() {
            AttemptResult::Success
        } else if self.is_aborted() || self.failed.iter().any(|f| f.retryable) {
            AttemptResult::TransientFailure
        } else {
            AttemptResult::FatalFailure
        }
    }

    /// Human readable per-resource detail for condition messages
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self.failed.iter().map(ToString::to_string).collect();
        if !self.aborted.is_empty() {
            let aborted: Vec<String> = self.aborted.iter().map(ToString::to_string).collect();
            parts.push(format!("aborted: {}", aborted.join(", ")));
        }
        parts.join("; ")
    }
}

/// Backoff state for a resource
/// Tracks error count and backoff calculator for per-resource backoff
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.backoff.reset();
        self.error_count = 0;
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure writing Konfiguration state back to the API server
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    Api(String),
    #[error("Konfiguration {0} not found")]
    NotFound(String),
    #[error("failed to encode status: {0}")]
    Encode(String),
}

/// Error escaping the scheduler, handled by the controller error policy
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to persist Konfiguration state: {0}")]
    Store(#[from] StoreError),
}

/// What a reconciliation attempt ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// `suspend=true`, nothing was done
    Suspended,
    /// Another attempt for the same Konfiguration is in flight
    Busy,
    /// Interrupted by deletion of the Konfiguration, nothing was committed
    Cancelled,
    InvalidSpec,
    DependencyNotReady,
    DependencyCycle,
    /// Revision, generation and last result unchanged, rendering skipped
    UpToDate,
    Completed(AttemptResult),
    /// Cleanup of a deleted Konfiguration is still pending
    Deleting,
    /// The finalizer was removed
    Released,
}

impl AttemptState {
    /// Requeue reason label
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Suspended => "suspended",
            AttemptState::Busy => "busy",
            AttemptState::Cancelled => "cancelled",
            AttemptState::InvalidSpec => "invalid-spec",
            AttemptState::DependencyNotReady => "dependency-not-ready",
            AttemptState::DependencyCycle => "dependency-cycle",
            AttemptState::UpToDate => "up-to-date",
            AttemptState::Completed(AttemptResult::Success) => "success",
            AttemptState::Completed(AttemptResult::TransientFailure) => "transient-failure",
            AttemptState::Completed(AttemptResult::FatalFailure) => "fatal-failure",
            AttemptState::Deleting => "deleting",
            AttemptState::Released => "released",
        }
    }
}

/// Result of one call into the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptReport {
    pub state: AttemptState,
    /// None when no requeue is needed (the Konfiguration is gone)
    pub requeue_after: Option<Duration>,
}

impl AttemptReport {
    pub fn requeue(state: AttemptState, after: Duration) -> Self {
        Self {
            state,
            requeue_after: Some(after),
        }
    }

    pub fn done(state: AttemptState) -> Self {
        Self {
            state,
            requeue_after: None,
        }
    }
}
