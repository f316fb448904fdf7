use std::collections::BTreeMap;

use resources::objects::{
    pod::EnvVar,
    trigger_authentication::{PodIdentityProvider, TriggerAuthenticationSpec},
};
use sha2::{Digest, Sha256};

use crate::{error::ScalerError, platform::ApiClient};

mod vault;

pub use vault::VaultClient;

/// Credential material resolved for one scaler instance. Immutable once
/// built; values never appear in logs or Debug output.
#[derive(Clone)]
pub struct ResolvedAuth {
    params: BTreeMap<String, String>,
    pub pod_identity: PodIdentityProvider,
    pub identity_id: Option<String>,
    /// Key identifying the auth principal. Feeds the trigger fingerprint,
    /// so rotated credentials force a cache rebuild.
    pub principal_key: String,
}

impl ResolvedAuth {
    pub fn empty() -> Self {
        let mut auth = ResolvedAuth {
            params: BTreeMap::new(),
            pod_identity: PodIdentityProvider::None,
            identity_id: None,
            principal_key: String::new(),
        };
        auth.principal_key = auth.digest();
        auth
    }

    pub fn get(&self, parameter: &str) -> Option<&str> {
        self.params.get(parameter).map(|v| v.as_str())
    }

    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.params {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.pod_identity.to_string().as_bytes());
        if let Some(id) = &self.identity_id {
            hasher.update(id.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Parameter names only, never the material itself
        f.debug_struct("ResolvedAuth")
            .field("parameters", &self.params.keys().collect::<Vec<_>>())
            .field("pod_identity", &self.pod_identity)
            .field("principal_key", &self.principal_key)
            .finish()
    }
}

/// Resolves a trigger's credential parameters from, in precedence order:
/// `<name>FromEnv` references in the trigger metadata, environment
/// references on the TriggerAuthentication, Secret references, Vault
/// lookups, and finally a pod-identity assertion. The first source to
/// provide a parameter wins.
pub struct AuthResolver {
    api: ApiClient,
}

const FROM_ENV_SUFFIX: &str = "FromEnv";

impl AuthResolver {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
        }
    }

    pub async fn resolve(
        &self,
        trigger_metadata: &BTreeMap<String, String>,
        auth_spec: Option<&TriggerAuthenticationSpec>,
        target_env: &[EnvVar],
    ) -> Result<ResolvedAuth, ScalerError> {
        if auth_spec.is_none()
            && !trigger_metadata
                .keys()
                .any(|key| key.ends_with(FROM_ENV_SUFFIX))
        {
            return Ok(ResolvedAuth::empty());
        }

        let mut params = BTreeMap::new();

        // 1. <name>FromEnv entries in the trigger metadata
        for (key, env_name) in trigger_metadata {
            if let Some(parameter) = key.strip_suffix(FROM_ENV_SUFFIX) {
                if parameter.is_empty() {
                    continue;
                }
                let value = lookup_env(target_env, env_name).ok_or_else(|| {
                    ScalerError::config_param(
                        key,
                        &format!("environment variable {} not found on scale target", env_name),
                    )
                })?;
                params.insert(parameter.to_string(), value);
            }
        }

        let mut pod_identity = PodIdentityProvider::None;
        let mut identity_id = None;

        if let Some(spec) = auth_spec {
            // 2. Environment references on the TriggerAuthentication
            for env_ref in &spec.env_target_ref {
                if params.contains_key(&env_ref.parameter) {
                    continue;
                }
                let value = lookup_env(target_env, &env_ref.name).ok_or_else(|| {
                    ScalerError::config_param(
                        &env_ref.parameter,
                        &format!(
                            "environment variable {} not found on scale target",
                            env_ref.name
                        ),
                    )
                })?;
                params.insert(env_ref.parameter.to_owned(), value);
            }

            // 3. Secret references fetched from the api-server
            for secret_ref in &spec.secret_target_ref {
                if params.contains_key(&secret_ref.parameter) {
                    continue;
                }
                let secret = self.api.get_secret(&secret_ref.name).await.map_err(|e| {
                    ScalerError::Auth(format!("secret {}: {:#}", secret_ref.name, e))
                })?;
                let value = secret.data.get(&secret_ref.key).ok_or_else(|| {
                    ScalerError::Auth(format!(
                        "secret {} has no key {}",
                        secret_ref.name, secret_ref.key
                    ))
                })?;
                params.insert(secret_ref.parameter.to_owned(), value.to_owned());
            }

            // 4. Vault lookups
            if let Some(vault) = &spec.hashi_corp_vault {
                let client = VaultClient::new(vault)?;
                for entry in &vault.secrets {
                    if params.contains_key(&entry.parameter) {
                        continue;
                    }
                    let value = client.fetch(&entry.path, &entry.key).await?;
                    params.insert(entry.parameter.to_owned(), value);
                }
            }

            // 5. Pod identity defers materialization to the provider
            if let Some(identity) = &spec.pod_identity {
                pod_identity = identity.provider.clone();
                identity_id = identity.identity_id.clone();
            }
        }

        let mut auth = ResolvedAuth {
            params,
            pod_identity,
            identity_id,
            principal_key: String::new(),
        };
        auth.principal_key = auth.digest();
        Ok(auth)
    }
}

fn lookup_env(env: &[EnvVar], name: &str) -> Option<String> {
    env.iter()
        .find(|var| var.name == name)
        .map(|var| var.value.to_owned())
}

#[cfg(test)]
mod tests {
    use resources::objects::trigger_authentication::{EnvTargetRef, PodIdentity};

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<EnvVar> {
        pairs
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn from_env_wins_over_auth_reference() {
        let resolver = AuthResolver::new(ApiClient::new());
        let mut metadata = BTreeMap::new();
        metadata.insert("passwordFromEnv".to_string(), "RABBIT_PASSWORD".to_string());
        let spec = TriggerAuthenticationSpec {
            env_target_ref: vec![EnvTargetRef {
                parameter: "password".to_string(),
                name: "OTHER_PASSWORD".to_string(),
            }],
            ..Default::default()
        };
        let target_env = env(&[("RABBIT_PASSWORD", "hunter2"), ("OTHER_PASSWORD", "nope")]);

        let auth = resolver
            .resolve(&metadata, Some(&spec), &target_env)
            .await
            .unwrap();
        assert_eq!(auth.get("password"), Some("hunter2"));
    }

    #[tokio::test]
    async fn missing_env_reference_is_config_error() {
        let resolver = AuthResolver::new(ApiClient::new());
        let mut metadata = BTreeMap::new();
        metadata.insert("tokenFromEnv".to_string(), "MISSING".to_string());

        let err = resolver
            .resolve(&metadata, None, &[])
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("tokenFromEnv"));
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let resolver = AuthResolver::new(ApiClient::new());
        let mut metadata = BTreeMap::new();
        metadata.insert("userFromEnv".to_string(), "USER".to_string());
        let target_env = env(&[("USER", "guest")]);

        let first = resolver.resolve(&metadata, None, &target_env).await.unwrap();
        let second = resolver.resolve(&metadata, None, &target_env).await.unwrap();
        assert_eq!(first.principal_key, second.principal_key);
    }

    #[tokio::test]
    async fn principal_key_tracks_material_and_identity() {
        let resolver = AuthResolver::new(ApiClient::new());
        let mut metadata = BTreeMap::new();
        metadata.insert("userFromEnv".to_string(), "USER".to_string());

        let before = resolver
            .resolve(&metadata, None, &env(&[("USER", "guest")]))
            .await
            .unwrap();
        // Rotated backing value changes the principal
        let after = resolver
            .resolve(&metadata, None, &env(&[("USER", "admin")]))
            .await
            .unwrap();
        assert_ne!(before.principal_key, after.principal_key);

        let spec = TriggerAuthenticationSpec {
            pod_identity: Some(PodIdentity {
                provider: PodIdentityProvider::Aws,
                identity_id: Some("arn:aws:iam::1:role/poller".to_string()),
            }),
            ..Default::default()
        };
        let with_identity = resolver
            .resolve(&metadata, Some(&spec), &env(&[("USER", "guest")]))
            .await
            .unwrap();
        assert_ne!(before.principal_key, with_identity.principal_key);
        assert_eq!(with_identity.pod_identity, PodIdentityProvider::Aws);
    }

    #[test]
    fn debug_redacts_values() {
        let mut params = BTreeMap::new();
        params.insert("password".to_string(), "hunter2".to_string());
        let mut auth = ResolvedAuth {
            params,
            pod_identity: PodIdentityProvider::None,
            identity_id: None,
            principal_key: String::new(),
        };
        auth.principal_key = auth.digest();
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("password"));
        assert!(!rendered.contains("hunter2"));
    }
}
