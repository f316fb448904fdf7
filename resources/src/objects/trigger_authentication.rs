use serde::{Deserialize, Serialize};
use strum::Display;

use super::{Metadata, Object};

/// Named credential bundle a trigger can reference. Resolution walks the
/// trigger's recognized parameters against this record; see the operator's
/// auth resolver for the precedence order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TriggerAuthentication {
    pub metadata: Metadata,
    pub spec: TriggerAuthenticationSpec,
}

impl Object for TriggerAuthentication {
    fn kind(&self) -> &'static str {
        "TriggerAuthentication"
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn uri(&self) -> String {
        format!("/api/v1/triggerauthentications/{}", self.metadata.name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAuthenticationSpec {
    /// Parameters filled from Secret objects on the API server.
    #[serde(default)]
    pub secret_target_ref: Vec<SecretTargetRef>,
    /// Parameters filled from the scale target's container environment.
    #[serde(default)]
    pub env_target_ref: Vec<EnvTargetRef>,
    /// Parameters fetched from a HashiCorp Vault KV store.
    pub hashi_corp_vault: Option<HashiCorpVault>,
    /// Defers credential materialization to the cloud provider.
    pub pod_identity: Option<PodIdentity>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SecretTargetRef {
    /// Trigger parameter this entry resolves.
    pub parameter: String,
    /// Name of the Secret object.
    pub name: String,
    /// Key within the Secret's data.
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnvTargetRef {
    /// Trigger parameter this entry resolves.
    pub parameter: String,
    /// Name of the environment variable on the scale target's containers.
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HashiCorpVault {
    /// Base address of the Vault server, e.g. `https://vault:8200`.
    pub address: String,
    /// Token presented as `X-Vault-Token`.
    pub token: String,
    #[serde(default)]
    pub secrets: Vec<VaultSecret>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VaultSecret {
    /// Trigger parameter this entry resolves.
    pub parameter: String,
    /// Mount relative path of the KV v2 secret.
    pub path: String,
    /// Key within the secret data.
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentity {
    pub provider: PodIdentityProvider,
    /// Provider specific principal, e.g. an AWS role ARN.
    pub identity_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PodIdentityProvider {
    None,
    Aws,
    Azure,
    Gcp,
}
