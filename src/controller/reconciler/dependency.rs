//! # Dependency Gate
//!
//! Decides whether a Konfiguration's dependencies are Ready. The graph is
//! walked depth-first on demand, with a visited set per call; there is no
//! global graph. Readiness is read at call time and may be stale by the time
//! the attempt proceeds, which the next interval corrects.

use crate::controller::reconciler::store::UnitStore;
use crate::controller::reconciler::types::StoreError;
use crate::crd::{ConditionStatus, Konfiguration, UnitKey};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    Ready,
    NotReady(String),
    /// Dependency path that closes a cycle, first and last element equal
    Cycle(Vec<UnitKey>),
}

impl GateResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateResult::Ready => "ready",
            GateResult::NotReady(_) => "not_ready",
            GateResult::Cycle(_) => "cycle",
        }
    }
}

/// Error while walking the dependency graph
#[derive(Debug)]
pub enum GateError {
    Store(StoreError),
    Cancelled,
}

struct Frame {
    key: UnitKey,
    dependencies: Vec<UnitKey>,
    next: usize,
}

/// Evaluate the dependency gate for `unit`
///
/// Cycles are searched across the transitive graph and take precedence over
/// readiness. Readiness is required of direct dependencies only; each of
/// them is gated on its own dependencies when it reconciles.
pub async fn is_ready(
    unit: &Konfiguration,
    store: &dyn UnitStore,
    cancel: &CancellationToken,
) -> Result<GateResult, GateError> {
    let root = unit.key();
    let direct = unit.dependencies();
    if direct.is_empty() {
        return Ok(GateResult::Ready);
    }

    let mut fetched: HashMap<UnitKey, Option<Konfiguration>> = HashMap::new();
    let mut visited: HashSet<UnitKey> = HashSet::from([root.clone()]);
    let mut path: Vec<Frame> = vec![Frame {
        key: root,
        dependencies: direct.clone(),
        next: 0,
    }];

    while let Some(frame) = path.last_mut() {
        let Some(dependency) = frame.dependencies.get(frame.next).cloned() else {
            path.pop();
            continue;
        };
        frame.next += 1;

        if let Some(position) = path.iter().position(|f| f.key == dependency) {
            let mut cycle: Vec<UnitKey> = path[position..].iter().map(|f| f.key.clone()).collect();
            cycle.push(dependency);
            return Ok(GateResult::Cycle(cycle));
        }
        if !visited.insert(dependency.clone()) {
            continue;
        }

        let unit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(GateError::Cancelled),
            result = store.get(&dependency) => result.map_err(GateError::Store)?,
        };
        let dependencies = unit.as_ref().map(Konfiguration::dependencies).unwrap_or_default();
        fetched.insert(dependency.clone(), unit);
        path.push(Frame {
            key: dependency,
            dependencies,
            next: 0,
        });
    }

    for dependency in &direct {
        match fetched.get(dependency).and_then(Option::as_ref) {
            None => {
                return Ok(GateResult::NotReady(format!(
                    "dependency '{dependency}' not found"
                )))
            }
            Some(dep) => {
                let ready = dep
                    .ready_condition()
                    .is_some_and(|c| c.status == ConditionStatus::True);
                if !ready {
                    return Ok(GateResult::NotReady(format!(
                        "dependency '{dependency}' is not ready"
                    )));
                }
            }
        }
    }

    Ok(GateResult::Ready)
}

/// Format a cycle path as `a/x -> b/y -> a/x`
pub fn describe_cycle(cycle: &[UnitKey]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
