//! Kubeconfig secrets in the Konfiguration's namespace.

use crate::provider::credentials::{CredentialError, CredentialFetcher, KUBECONFIG_DATA_KEY};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;

pub struct SecretCredentialFetcher {
    client: kube::Client,
}

impl SecretCredentialFetcher {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialFetcher for SecretCredentialFetcher {
    async fn fetch(&self, secret_name: &str, namespace: &str) -> Result<Vec<u8>, CredentialError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match secrets.get(secret_name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                return Err(CredentialError::NotFound {
                    namespace: namespace.to_string(),
                    name: secret_name.to_string(),
                })
            }
            Err(e) => return Err(CredentialError::Api(e.to_string())),
        };

        if let Some(value) = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_DATA_KEY))
        {
            return Ok(value.0.clone());
        }
        secret
            .string_data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_DATA_KEY))
            .map(|value| value.as_bytes().to_vec())
            .ok_or_else(|| CredentialError::NoDataKey {
                namespace: namespace.to_string(),
                name: secret_name.to_string(),
            })
    }
}
