//! # Apply Executor
//!
//! Runs an ordered operation list against the cluster under a deadline.
//! Failures are collected per operation rather than stopping at the first one.

use crate::controller::reconciler::types::{
    ExecutionReport, FailedOperation, Operation, OperationKind,
};
use crate::controller::reconciler::validation::validate_manifest;
use crate::observability::metrics;
use crate::provider::{ClusterClient, ClusterError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

/// Per-operation result
enum Outcome {
    Succeeded,
    Failed(FailedOperation),
    Aborted,
}

/// Execute `operations` in order
///
/// With `validate`, each create/update payload is checked locally and then
/// submitted as a server-side dry-run first. A rejected pre-check fails that
/// single operation. Once `deadline` is cancelled, the in-flight call is
/// dropped and every remaining operation is reported as aborted.
pub async fn execute(
    client: &dyn ClusterClient,
    operations: &[Operation],
    validate: bool,
    deadline: &CancellationToken,
) -> ExecutionReport {
    let mut report = ExecutionReport::default();

    for (index, operation) in operations.iter().enumerate() {
        if deadline.is_cancelled() {
            report
                .aborted
                .extend(operations[index..].iter().map(|op| op.object.clone()));
            break;
        }

        let span = info_span!(
            "apply.operation",
            operation = operation.kind.as_str(),
            object = %operation.object
        );
        let outcome = run_operation(client, operation, validate, deadline)
            .instrument(span)
            .await;

        match outcome {
            Outcome::Succeeded => {
                metrics::increment_operations_total(operation.kind.as_str(), "success");
                report.succeeded.push(operation.object.clone());
            }
            Outcome::Failed(failure) => {
                let outcome = if failure.retryable {
                    "transient_failure"
                } else {
                    "fatal_failure"
                };
                metrics::increment_operations_total(operation.kind.as_str(), outcome);
                warn!("{}", failure);
                report.failed.push(failure);
            }
            Outcome::Aborted => {
                metrics::increment_operations_total(operation.kind.as_str(), "aborted");
                report
                    .aborted
                    .extend(operations[index..].iter().map(|op| op.object.clone()));
                break;
            }
        }
    }

    report
}

async fn run_operation(
    client: &dyn ClusterClient,
    operation: &Operation,
    validate: bool,
    deadline: &CancellationToken,
) -> Outcome {
    if validate && matches!(operation.kind, OperationKind::Create | OperationKind::Update) {
        if let Some(outcome) = pre_check(client, operation, deadline).await {
            return outcome;
        }
    }

    let call = submit(client, operation, false);
    let result = tokio::select! {
        biased;
        () = deadline.cancelled() => return Outcome::Aborted,
        result = call => result,
    };

    match result {
        Ok(()) => {
            debug!("{} {} succeeded", operation.kind, operation.object);
            Outcome::Succeeded
        }
        // Already gone is the desired end state of a delete
        Err(ClusterError::NotFound) if operation.kind == OperationKind::Delete => {
            Outcome::Succeeded
        }
        Err(error) => Outcome::Failed(FailedOperation {
            kind: operation.kind,
            object: operation.object.clone(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            validation: false,
        }),
    }
}

/// Local structure check followed by a server-side dry-run.
/// Returns None when the payload passed.
async fn pre_check(
    client: &dyn ClusterClient,
    operation: &Operation,
    deadline: &CancellationToken,
) -> Option<Outcome> {
    let rejected = |message: String, retryable: bool| {
        Some(Outcome::Failed(FailedOperation {
            kind: operation.kind,
            object: operation.object.clone(),
            message,
            retryable,
            validation: true,
        }))
    };

    if operation.kind == OperationKind::Create {
        if let Err(e) = validate_manifest(&operation.payload) {
            return rejected(format!("validation failed: {e}"), false);
        }
    }

    let dry_run = tokio::select! {
        biased;
        () = deadline.cancelled() => return Some(Outcome::Aborted),
        result = submit(client, operation, true) => result,
    };
    match dry_run {
        Ok(()) => None,
        Err(error) => rejected(
            format!("dry-run rejected: {error}"),
            error.is_retryable(),
        ),
    }
}

async fn submit(
    client: &dyn ClusterClient,
    operation: &Operation,
    dry_run: bool,
) -> Result<(), ClusterError> {
    match operation.kind {
        OperationKind::Create => client
            .create(&operation.object, &operation.payload, dry_run)
            .await
            .map(drop),
        OperationKind::Update => client
            .update(&operation.object, &operation.payload, dry_run)
            .await
            .map(drop),
        OperationKind::Delete => client.delete(&operation.object).await,
        OperationKind::Get => client.get(&operation.object).await.map(drop),
    }
}

/// Count the failures that came from the validation pre-check
pub fn validation_failures(report: &ExecutionReport) -> usize {
    report.failed.iter().filter(|f| f.validation).count()
}

