//! # Snapshot
//!
//! Construction and queries of the persisted record of the last fully
//! successful apply+prune cycle.

use crate::controller::reconciler::diff::{normalize, DesiredObject};
use crate::crd::{Snapshot, SnapshotResource};
use crate::provider::{ObjectKey, ObjectRef};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Rebuild objects with sorted keys so serialization is order independent
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `sha256:` digest over the canonical JSON of a manifest set
pub fn checksum(manifests: &[Value]) -> String {
    let mut hasher = Sha256::new();
    for manifest in manifests {
        hasher.update(canonicalize(manifest).to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("sha256:{:x}", hasher.finalize())
}

impl SnapshotResource {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(
            self.api_version.clone(),
            self.kind.clone(),
            self.namespace.as_deref(),
            self.name.clone(),
        )
    }

    pub fn key(&self) -> ObjectKey {
        self.object_ref().key()
    }

    fn from_object(object: &ObjectRef, applied: Option<String>) -> Self {
        Self {
            api_version: object.api_version.clone(),
            kind: object.kind.clone(),
            namespace: object.namespace.clone(),
            name: object.name.clone(),
            applied,
        }
    }
}

impl Snapshot {
    /// Snapshot of a fully applied desired set, in manifest order
    pub fn from_applied(checksum: String, desired: &[DesiredObject]) -> Self {
        let resources = desired
            .iter()
            .map(|item| {
                let applied = canonicalize(&normalize(&item.manifest)).to_string();
                SnapshotResource::from_object(&item.object, Some(applied))
            })
            .collect();
        Self::from_resources(checksum, resources)
    }

    /// Snapshot over the given resources, with `entries` projected from them
    pub fn from_resources(checksum: String, resources: Vec<SnapshotResource>) -> Self {
        let mut entries: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for resource in &resources {
            let names = entries
                .entry(resource.namespace.clone().unwrap_or_default())
                .or_default()
                .entry(resource.kind.clone())
                .or_default();
            names.push(resource.name.clone());
        }
        for kinds in entries.values_mut() {
            for names in kinds.values_mut() {
                names.sort();
                names.dedup();
            }
        }
        Self {
            checksum,
            entries,
            resources,
        }
    }

    /// Previously applied configuration per object, for three-way diffs
    pub fn applied_configs(&self) -> HashMap<ObjectKey, Value> {
        self.resources
            .iter()
            .filter_map(|resource| {
                let applied = resource.applied.as_deref()?;
                let value = serde_json::from_str(applied).ok()?;
                Some((resource.key(), value))
            })
            .collect()
    }

    /// Copy keeping only the resources whose key is in `keep`, order preserved
    pub fn retain(&self, keep: &HashSet<ObjectKey>) -> Self {
        let resources = self
            .resources
            .iter()
            .filter(|resource| keep.contains(&resource.key()))
            .cloned()
            .collect();
        Self::from_resources(self.checksum.clone(), resources)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
