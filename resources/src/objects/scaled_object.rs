use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{
    condition::Condition, hpa::HorizontalPodAutoscalerBehavior,
    object_reference::ObjectReference, trigger::Trigger, Metadata, Object,
};

/// Annotation pinning a ScaledObject's target to a fixed replica count.
/// While present, polling is suspended for the object.
pub const PAUSED_REPLICAS_ANNOTATION: &str = "autoscaling.keda.sh/paused-replicas";

/// ScaledObject declares event-driven autoscaling for a deployment-like
/// workload, including scale-to-zero and scale-from-zero.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScaledObject {
    pub metadata: Metadata,
    pub spec: ScaledObjectSpec,
    pub status: Option<ScaledObjectStatus>,
}

impl Object for ScaledObject {
    fn kind(&self) -> &'static str {
        "ScaledObject"
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn uri(&self) -> String {
        format!("/api/v1/scaledobjects/{}", self.metadata.name)
    }
}

impl ScaledObject {
    /// Name of the HPA derived from this object.
    pub fn hpa_name(&self) -> String {
        format!("keda-hpa-{}", self.metadata.name)
    }

    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            kind: "ScaledObject".to_string(),
            name: self.metadata.name.to_owned(),
        }
    }

    /// Replica count pinned by the paused annotation, if any.
    /// A malformed value is treated as absent.
    pub fn paused_replicas(&self) -> Option<u32> {
        self.metadata
            .annotations
            .get(PAUSED_REPLICAS_ANNOTATION)
            .and_then(|v| v.parse::<u32>().ok())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaledObjectSpec {
    /// The workload whose replica count is managed.
    pub scale_target_ref: ObjectReference,
    /// Lower replica bound. 0 enables scale-to-zero.
    #[serde(default)]
    pub min_replica_count: u32,
    /// Upper replica bound handed to the HPA.
    #[serde(default = "default_max_replica_count")]
    pub max_replica_count: u32,
    /// Seconds between trigger polls.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u32,
    /// Seconds of continuous inactivity before scaling to zero.
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period: u32,
    /// Replica count to rest at while no trigger is active.
    /// Only 0 is accepted, and only with `min_replica_count > 0`.
    pub idle_replica_count: Option<u32>,
    /// Replica count substituted when a scaler keeps failing.
    pub fallback: Option<Fallback>,
    #[serde(default)]
    pub advanced: Advanced,
    pub triggers: Vec<Trigger>,
}

pub fn default_max_replica_count() -> u32 {
    100
}

pub fn default_polling_interval() -> u32 {
    30
}

fn default_cooldown_period() -> u32 {
    300
}

/// Fallback substitutes a constant replica count when a scaler fails
/// `failure_threshold` consecutive polls.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fallback {
    pub failure_threshold: u32,
    pub replicas: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Advanced {
    /// Write the pre-management replica count back on deletion.
    #[serde(default)]
    pub restore_to_original_replica_count: bool,
    /// Tuning carried into the derived HPA unchanged.
    pub horizontal_pod_autoscaler_config: Option<HorizontalPodAutoscalerConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HorizontalPodAutoscalerConfig {
    pub behavior: Option<HorizontalPodAutoscalerBehavior>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaledObjectStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Replica count observed before the core took over,
    /// restored on deletion when requested.
    pub original_replica_count: Option<u32>,
    /// External metric names registered for this object.
    #[serde(default)]
    pub external_metric_names: Vec<String>,
    /// Last time any trigger reported activity.
    pub last_active_time: Option<NaiveDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_replicas_parses_annotation() {
        let mut so = ScaledObject {
            metadata: Metadata {
                name: "worker".to_string(),
                ..Default::default()
            },
            spec: ScaledObjectSpec {
                scale_target_ref: ObjectReference {
                    kind: "ReplicaSet".to_string(),
                    name: "worker".to_string(),
                },
                min_replica_count: 0,
                max_replica_count: default_max_replica_count(),
                polling_interval: default_polling_interval(),
                cooldown_period: 300,
                idle_replica_count: None,
                fallback: None,
                advanced: Advanced::default(),
                triggers: Vec::new(),
            },
            status: None,
        };
        assert_eq!(so.paused_replicas(), None);
        so.metadata
            .annotations
            .insert(PAUSED_REPLICAS_ANNOTATION.to_string(), "3".to_string());
        assert_eq!(so.paused_replicas(), Some(3));
        so.metadata
            .annotations
            .insert(PAUSED_REPLICAS_ANNOTATION.to_string(), "nope".to_string());
        assert_eq!(so.paused_replicas(), None);
    }
}
