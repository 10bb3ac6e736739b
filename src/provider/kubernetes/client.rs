//! Dynamic object access through discovered API resources.

use crate::constants::FIELD_MANAGER;
use crate::provider::cluster::{ClusterClient, ClusterError, ObjectRef, ResourceScope};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{pinned_kind, Scope};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Map a kube-rs error onto the retryability classes of [`ClusterError`]
pub fn map_kube_error(error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(response) => match response.code {
            404 => ClusterError::NotFound,
            409 => ClusterError::Conflict(response.message.clone()),
            400 | 422 => ClusterError::Invalid(response.message.clone()),
            _ => ClusterError::Unavailable(format!("{} ({})", response.message, response.code)),
        },
        kube::Error::SerdeError(e) => ClusterError::Invalid(e.to_string()),
        other => ClusterError::Unavailable(other.to_string()),
    }
}

/// Cluster client working on `DynamicObject`s
///
/// API resources are discovered once per group/version/kind and cached for
/// the lifetime of the client.
pub struct DynamicClusterClient {
    client: kube::Client,
    resources: RwLock<HashMap<GroupVersionKind, (ApiResource, ResourceScope)>>,
}

impl DynamicClusterClient {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<(ApiResource, ResourceScope), ClusterError> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        let gvk = GroupVersionKind::gvk(group, version, kind);

        if let Ok(resources) = self.resources.read() {
            if let Some(entry) = resources.get(&gvk) {
                return Ok(entry.clone());
            }
        }

        let (resource, capabilities) = pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| match map_kube_error(e) {
                // The kind may be served once an earlier manifest (e.g. a CRD)
                // has been established
                ClusterError::NotFound => ClusterError::Unavailable(format!(
                    "no API resource serves {api_version} {kind}"
                )),
                other => other,
            })?;
        let scope = match capabilities.scope {
            Scope::Cluster => ResourceScope::ClusterWide,
            Scope::Namespaced => ResourceScope::Namespaced,
        };

        debug!("Discovered {} {} ({:?})", api_version, kind, scope);
        if let Ok(mut resources) = self.resources.write() {
            resources.insert(gvk, (resource.clone(), scope));
        }
        Ok((resource, scope))
    }

    async fn api(&self, object: &ObjectRef) -> Result<Api<DynamicObject>, ClusterError> {
        let (resource, scope) = self.resolve(&object.api_version, &object.kind).await?;
        Ok(match (scope, object.namespace.as_deref()) {
            (ResourceScope::Namespaced, Some(namespace)) => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            (ResourceScope::Namespaced, None) => {
                return Err(ClusterError::Invalid(format!(
                    "{object} is namespaced but has no namespace"
                )))
            }
            (ResourceScope::ClusterWide, _) => Api::all_with(self.client.clone(), &resource),
        })
    }
}

fn to_value(object: DynamicObject) -> Result<Value, ClusterError> {
    serde_json::to_value(object).map_err(|e| ClusterError::Invalid(e.to_string()))
}

#[async_trait]
impl ClusterClient for DynamicClusterClient {
    async fn scope(&self, api_version: &str, kind: &str) -> Result<ResourceScope, ClusterError> {
        Ok(self.resolve(api_version, kind).await?.1)
    }

    async fn get(&self, object: &ObjectRef) -> Result<Value, ClusterError> {
        let api = self.api(object).await?;
        to_value(api.get(&object.name).await.map_err(map_kube_error)?)
    }

    async fn create(
        &self,
        object: &ObjectRef,
        payload: &Value,
        dry_run: bool,
    ) -> Result<Value, ClusterError> {
        let api = self.api(object).await?;
        let dynamic: DynamicObject = serde_json::from_value(payload.clone())
            .map_err(|e| ClusterError::Invalid(format!("invalid object {object}: {e}")))?;
        let params = PostParams {
            dry_run,
            field_manager: Some(FIELD_MANAGER.to_string()),
        };
        to_value(api.create(&params, &dynamic).await.map_err(map_kube_error)?)
    }

    async fn update(
        &self,
        object: &ObjectRef,
        patch: &Value,
        dry_run: bool,
    ) -> Result<Value, ClusterError> {
        let api = self.api(object).await?;
        let mut params = PatchParams::default();
        params.dry_run = dry_run;
        params.field_manager = Some(FIELD_MANAGER.to_string());
        to_value(
            api.patch(&object.name, &params, &Patch::Merge(patch))
                .await
                .map_err(map_kube_error)?,
        )
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), ClusterError> {
        let api = self.api(object).await?;
        api.delete(&object.name, &DeleteParams::background())
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }
}
