//! # Diff Engine
//!
//! Pure computation of the operations needed to move live objects towards
//! their desired manifests.
//!
//! Both sides are normalized before comparison: `status` and server-managed
//! metadata are not part of an object's configuration.
//!
//! - `all` compares every field. Fields present live but absent from the
//!   manifest count as drift. The update turns the live object into the
//!   manifest, clearing every live-only field.
//! - `subset` compares only manifest-declared fields. The update carries just
//!   the differing fields, so extra live fields are never cleared.
//! - `last-applied` works like `subset` and additionally clears (sets to
//!   `null`) every field that was in the previously applied configuration but
//!   is no longer declared.

use crate::controller::reconciler::types::Operation;
use crate::crd::DiffStrategy;
use crate::provider::{ObjectKey, ObjectRef};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Metadata fields owned by the API server
const SERVER_MANAGED_METADATA: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "managedFields",
    "selfLink",
];

/// A rendered object with its identity
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredObject {
    pub object: ObjectRef,
    pub manifest: Value,
}

/// Strip `status` and server-managed metadata
pub fn normalize(object: &Value) -> Value {
    let mut normalized = object.clone();
    if let Value::Object(map) = &mut normalized {
        map.remove("status");
        let empty_metadata = match map.get_mut("metadata") {
            Some(Value::Object(metadata)) => {
                for field in SERVER_MANAGED_METADATA {
                    metadata.remove(*field);
                }
                metadata.is_empty()
            }
            _ => false,
        };
        if empty_metadata {
            map.remove("metadata");
        }
    }
    normalized
}

/// Compute the ordered operation list
///
/// Operations follow manifest order. Objects that need no change produce no
/// operation. `live` maps identities to current objects (absent means the
/// object does not exist); `prior` maps identities to the configuration
/// recorded by the last successful apply.
pub fn diff(
    strategy: DiffStrategy,
    desired: &[DesiredObject],
    live: &HashMap<ObjectKey, Value>,
    prior: &HashMap<ObjectKey, Value>,
) -> Vec<Operation> {
    desired
        .iter()
        .filter_map(|item| {
            let key = item.object.key();
            diff_object(strategy, &item.manifest, live.get(&key), prior.get(&key))
                .map(|operation| match operation {
                    ObjectChange::Create => {
                        Operation::create(item.object.clone(), normalize(&item.manifest))
                    }
                    ObjectChange::Update(patch) => Operation::update(item.object.clone(), patch),
                })
        })
        .collect()
}

/// Change required for one object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectChange {
    Create,
    /// JSON merge patch to apply to the live object
    Update(Value),
}

pub fn diff_object(
    strategy: DiffStrategy,
    desired: &Value,
    live: Option<&Value>,
    prior: Option<&Value>,
) -> Option<ObjectChange> {
    let Some(live) = live else {
        return Some(ObjectChange::Create);
    };
    let desired = normalize(desired);
    let live = normalize(live);

    match strategy {
        DiffStrategy::All => merge_patch(&live, &strip_nulls(&desired)).map(ObjectChange::Update),
        DiffStrategy::Subset => subset_patch(&desired, &live).map(ObjectChange::Update),
        DiffStrategy::LastApplied => {
            let prior = prior.map(normalize);
            three_way_patch(&desired, prior.as_ref(), &live).map(ObjectChange::Update)
        }
    }
}

/// Structural equality that treats numerically equal numbers as equal
/// (manifests may carry `1.0` where the server returns `1`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Whether every field declared in `desired` holds the same value in `live`
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => d.iter().all(|(k, dv)| match l.get(k) {
            Some(lv) => is_subset(dv, lv),
            None => dv.is_null(),
        }),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| is_subset(dv, lv))
        }
        _ => values_equal(desired, live),
    }
}

/// Merge patch carrying only the manifest-declared fields that differ
fn subset_patch(desired: &Value, live: &Value) -> Option<Value> {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => {
            let mut patch = Map::new();
            for (key, dv) in d {
                if dv.is_null() {
                    continue;
                }
                match l.get(key) {
                    Some(lv) => {
                        if let Some(sub) = subset_patch(dv, lv) {
                            patch.insert(key.clone(), sub);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), strip_nulls(dv));
                    }
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        // Merge patches replace arrays wholesale
        _ => (!is_subset(desired, live)).then(|| strip_nulls(desired)),
    }
}

/// Three-way merge patch: differing declared fields plus `null` for every
/// field dropped from the manifest since the prior apply
fn three_way_patch(desired: &Value, prior: Option<&Value>, live: &Value) -> Option<Value> {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => {
            let p = prior.and_then(Value::as_object);
            let mut patch = Map::new();
            for (key, dv) in d {
                if dv.is_null() {
                    continue;
                }
                match l.get(key) {
                    Some(lv) => {
                        let pv = p.and_then(|p| p.get(key));
                        if let Some(sub) = three_way_patch(dv, pv, lv) {
                            patch.insert(key.clone(), sub);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), strip_nulls(dv));
                    }
                }
            }
            if let Some(p) = p {
                for key in p.keys() {
                    let declared = d.get(key).is_some_and(|v| !v.is_null());
                    let held = l.get(key).is_some_and(|v| !v.is_null());
                    if !declared && held {
                        patch.insert(key.clone(), Value::Null);
                    }
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ => (!is_subset(desired, live)).then(|| strip_nulls(desired)),
    }
}

/// Drop `null` members so the value can be sent as a merge patch without
/// deleting anything
fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Merge patch turning `from` into `to`: the members of `to` that differ plus
/// `null` for every member only `from` holds. None when both are equal.
pub fn merge_patch(from: &Value, to: &Value) -> Option<Value> {
    match (from, to) {
        (Value::Object(f), Value::Object(t)) => {
            let mut patch = Map::new();
            for (key, tv) in t {
                match f.get(key) {
                    Some(fv) => {
                        if let Some(sub) = merge_patch(fv, tv) {
                            patch.insert(key.clone(), sub);
                        }
                    }
                    None if tv.is_null() => {}
                    None => {
                        patch.insert(key.clone(), tv.clone());
                    }
                }
            }
            for (key, fv) in f {
                if !t.contains_key(key) && !fv.is_null() {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ => (!values_equal(from, to)).then(|| to.clone()),
    }
}

/// Apply an RFC 7386 merge patch, as the API server does for updates
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                apply_merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
