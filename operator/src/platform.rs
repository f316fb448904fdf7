use anyhow::{anyhow, Context, Result};
use chrono::Local;
use resources::{
    models::Response,
    objects::{
        event::Event, hpa::HorizontalPodAutoscaler, job::Job, object_reference::ObjectReference,
        replica_set::ReplicaSet, scaled_object::ScaledObject, secret::Secret,
        trigger_authentication::TriggerAuthentication, KubeObject, Metadata, Object,
    },
};
use uuid::Uuid;

use crate::CONFIG;

/// Thin client over the API server's REST surface. Cheap to clone;
/// the underlying reqwest client is shared.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn get_replica_set(&self, name: &str) -> Result<ReplicaSet> {
        self.get_object::<ReplicaSet>(&format!("/api/v1/replicasets/{}", name))
            .await
    }

    pub async fn get_secret(&self, name: &str) -> Result<Secret> {
        self.get_object::<Secret>(&format!("/api/v1/secrets/{}", name))
            .await
    }

    pub async fn get_trigger_authentication(&self, name: &str) -> Result<TriggerAuthentication> {
        self.get_object::<TriggerAuthentication>(&format!("/api/v1/triggerauthentications/{}", name))
            .await
    }

    pub async fn get_scaled_object(&self, name: &str) -> Result<ScaledObject> {
        self.get_object::<ScaledObject>(&format!("/api/v1/scaledobjects/{}", name))
            .await
    }

    pub async fn get_hpa(&self, name: &str) -> Result<Option<HorizontalPodAutoscaler>> {
        let response = self
            .client
            .get(format!(
                "{}/api/v1/horizontalpodautoscalers/{}",
                CONFIG.api_server_url, name
            ))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .json::<Response<KubeObject>>()
            .await
            .with_context(|| format!("Error getting horizontalpodautoscaler {}", name))?;
        match response.data {
            Some(KubeObject::HorizontalPodAutoscaler(hpa)) => Ok(Some(hpa)),
            Some(object) => Err(anyhow!("Expecting HorizontalPodAutoscaler, got {}", object.kind())),
            None => Ok(None),
        }
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let response = self
            .client
            .get(format!("{}/api/v1/jobs", CONFIG.api_server_url))
            .send()
            .await?
            .json::<Response<Vec<Job>>>()
            .await
            .with_context(|| "Error listing jobs")?;
        response.data.ok_or_else(|| anyhow!("Failed to list jobs"))
    }

    pub async fn create_job(&self, job: Job) -> Result<()> {
        let name = job.metadata.name.to_owned();
        let response = self
            .client
            .post(format!("{}/api/v1/jobs", CONFIG.api_server_url))
            .json(&KubeObject::Job(job))
            .send()
            .await?
            .json::<Response<()>>()
            .await
            .with_context(|| format!("Error creating job {}", name))?;
        if let Some(msg) = response.msg {
            tracing::debug!("{}", msg);
        }
        Ok(())
    }

    pub async fn delete_job(&self, name: &str) -> Result<()> {
        self.delete(&format!("/api/v1/jobs/{}", name)).await
    }

    pub async fn create_hpa(&self, hpa: HorizontalPodAutoscaler) -> Result<()> {
        let name = hpa.metadata.name.to_owned();
        let response = self
            .client
            .post(format!(
                "{}/api/v1/horizontalpodautoscalers",
                CONFIG.api_server_url
            ))
            .json(&KubeObject::HorizontalPodAutoscaler(hpa))
            .send()
            .await?
            .json::<Response<()>>()
            .await
            .with_context(|| format!("Error creating horizontalpodautoscaler {}", name))?;
        if let Some(msg) = response.msg {
            tracing::info!("{}", msg);
        }
        Ok(())
    }

    pub async fn delete_hpa(&self, name: &str) -> Result<()> {
        self.delete(&format!("/api/v1/horizontalpodautoscalers/{}", name))
            .await
    }

    /// PUT an object at its own URI.
    pub async fn put_object(&self, object: &KubeObject) -> Result<()> {
        let response = self
            .client
            .put(format!("{}{}", CONFIG.api_server_url, object.uri()))
            .json(object)
            .send()
            .await?
            .json::<Response<()>>()
            .await
            .with_context(|| format!("Error updating {}", object.uri()))?;
        if let Some(msg) = response.msg {
            tracing::debug!("{}", msg);
        }
        Ok(())
    }

    /// Set the replica count of a ReplicaSet directly, bypassing the HPA.
    /// Used only at the zero boundary the HPA cannot manage.
    pub async fn scale_replica_set(&self, mut rs: ReplicaSet, replicas: u32) -> Result<()> {
        let from = rs.spec.replicas;
        rs.spec.replicas = replicas;
        let name = rs.metadata.name.to_owned();
        self.put_object(&KubeObject::ReplicaSet(rs)).await?;
        tracing::info!("Scaled replicaset {} from {} to {}", name, from, replicas);
        Ok(())
    }

    /// Record a cluster event attached to `involved`. Failures are logged
    /// and swallowed; events are best effort.
    pub async fn post_event(&self, involved: ObjectReference, reason: &str, message: &str) {
        let event = Event {
            metadata: Metadata {
                name: format!(
                    "{}.{}",
                    involved.name,
                    Uuid::new_v4().to_simple()
                ),
                ..Default::default()
            },
            involved_object: involved,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Local::now().naive_utc(),
        };
        let result = self
            .client
            .post(format!("{}/api/v1/events", CONFIG.api_server_url))
            .json(&KubeObject::Event(event))
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!("Failed to post event {}: {:#}", reason, e);
        }
    }

    async fn get_object<T: Object>(&self, uri: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", CONFIG.api_server_url, uri))
            .send()
            .await?
            .json::<Response<T>>()
            .await
            .with_context(|| format!("Error getting {}", uri))?;
        response
            .data
            .ok_or_else(|| anyhow!("Object {} not found", uri))
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}{}", CONFIG.api_server_url, uri))
            .send()
            .await?
            .json::<Response<()>>()
            .await
            .with_context(|| format!("Error deleting {}", uri))?;
        if let Some(msg) = response.msg {
            tracing::debug!("{}", msg);
        }
        Ok(())
    }
}
