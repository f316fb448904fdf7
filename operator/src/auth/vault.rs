use resources::objects::trigger_authentication::HashiCorpVault;
use serde::Deserialize;

use crate::{error::ScalerError, RUNTIME};

/// Minimal HashiCorp Vault KV v2 reader. One instance per resolution;
/// requests carry the process-wide default HTTP deadline.
pub struct VaultClient {
    address: reqwest::Url,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: std::collections::HashMap<String, String>,
}

impl VaultClient {
    pub fn new(spec: &HashiCorpVault) -> Result<Self, ScalerError> {
        let address = reqwest::Url::parse(&spec.address).map_err(|e| {
            ScalerError::config_param("hashiCorpVault.address", &e.to_string())
        })?;
        if spec.token.is_empty() {
            return Err(ScalerError::config_param(
                "hashiCorpVault.token",
                "must not be empty",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(RUNTIME.http_default_timeout())
            .build()
            .map_err(|e| ScalerError::Internal(e.to_string()))?;
        Ok(Self {
            address,
            token: spec.token.to_owned(),
            client,
        })
    }

    pub async fn fetch(&self, path: &str, key: &str) -> Result<String, ScalerError> {
        let url = self
            .address
            .join(&format!("/v1/secret/data/{}", path.trim_start_matches('/')))
            .map_err(|e| ScalerError::config_param("path", &e.to_string()))?;
        let response = self
            .client
            .get(url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| ScalerError::Auth(format!("vault request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(ScalerError::Auth(format!(
                "vault returned {} for secret {}",
                response.status(),
                path
            )));
        }
        let body = response
            .json::<KvReadResponse>()
            .await
            .map_err(|e| ScalerError::Auth(format!("vault response malformed: {}", e)))?;
        body.data
            .data
            .get(key)
            .cloned()
            .ok_or_else(|| ScalerError::Auth(format!("vault secret {} has no key {}", path, key)))
    }
}
