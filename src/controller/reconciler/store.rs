//! # Konfiguration Store
//!
//! Reads Konfigurations and persists the only state the controller owns:
//! the status subresource and its finalizer.

use crate::constants::FIELD_MANAGER;
use crate::controller::reconciler::types::StoreError;
use crate::crd::{Konfiguration, UnitKey};
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::Api;
use serde_json::Value;
use tracing::debug;

#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Current state of a Konfiguration, None if it does not exist
    async fn get(&self, key: &UnitKey) -> Result<Option<Konfiguration>, StoreError>;

    /// Apply a `{"status": ...}` merge patch in a single write
    async fn commit_status(&self, key: &UnitKey, patch: &Value) -> Result<(), StoreError>;

    /// Add or remove a finalizer
    async fn set_finalizer(
        &self,
        key: &UnitKey,
        finalizer: &str,
        present: bool,
    ) -> Result<(), StoreError>;
}

/// Store backed by the Kubernetes API
pub struct KubeUnitStore {
    client: kube::Client,
}

impl KubeUnitStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Konfiguration> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl UnitStore for KubeUnitStore {
    async fn get(&self, key: &UnitKey) -> Result<Option<Konfiguration>, StoreError> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| StoreError::Api(e.to_string()))
    }

    async fn commit_status(&self, key: &UnitKey, patch: &Value) -> Result<(), StoreError> {
        match self
            .api(&key.namespace)
            .patch_status(&key.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                // Deleted during reconciliation
                debug!("Konfiguration {} was deleted, skipping status update", key);
                Ok(())
            }
            Err(e) => Err(StoreError::Api(format!(
                "failed to update status for Konfiguration {key}: {e}"
            ))),
        }
    }

    async fn set_finalizer(
        &self,
        key: &UnitKey,
        finalizer: &str,
        present: bool,
    ) -> Result<(), StoreError> {
        let api = self.api(&key.namespace);
        let Some(current) = api
            .get_opt(&key.name)
            .await
            .map_err(|e| StoreError::Api(e.to_string()))?
        else {
            return if present {
                Err(StoreError::NotFound(key.to_string()))
            } else {
                Ok(())
            };
        };

        let mut finalizers = current.metadata.finalizers.clone().unwrap_or_default();
        let has = finalizers.iter().any(|f| f == finalizer);
        if has == present {
            return Ok(());
        }
        if present {
            finalizers.push(finalizer.to_string());
        } else {
            finalizers.retain(|f| f != finalizer);
        }

        // resourceVersion makes the list replacement conditional
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": current.metadata.resource_version,
            }
        });
        match api
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 && !present => Ok(()),
            Err(e) => Err(StoreError::Api(format!(
                "failed to update finalizers of Konfiguration {key}: {e}"
            ))),
        }
    }
}
