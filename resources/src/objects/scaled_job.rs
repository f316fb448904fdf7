use serde::{Deserialize, Serialize};

use super::{
    condition::Condition,
    job::JobSpec,
    object_reference::ObjectReference,
    scaled_object::{default_max_replica_count, default_polling_interval},
    trigger::Trigger,
    Metadata, Object,
};

/// ScaledJob turns queued work into one-shot worker Jobs: every polling
/// tick the scheduler computes how many Jobs to create from the current
/// queue depth, bounded by a concurrency ceiling, and prunes completed
/// Jobs past the history limits.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScaledJob {
    pub metadata: Metadata,
    pub spec: ScaledJobSpec,
    pub status: Option<ScaledJobStatus>,
}

impl Object for ScaledJob {
    fn kind(&self) -> &'static str {
        "ScaledJob"
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn uri(&self) -> String {
        format!("/api/v1/scaledjobs/{}", self.metadata.name)
    }
}

impl ScaledJob {
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            kind: "ScaledJob".to_string(),
            name: self.metadata.name.to_owned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaledJobSpec {
    /// Template the created Jobs are stamped from.
    pub job_target_ref: JobSpec,
    /// Ceiling on concurrently running Jobs.
    #[serde(default = "default_max_replica_count")]
    pub max_replica_count: u32,
    /// Seconds between trigger polls.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u32,
    /// Completed Jobs retained per outcome; older ones are deleted.
    #[serde(default = "default_history_limit")]
    pub successful_jobs_history_limit: u32,
    #[serde(default = "default_history_limit")]
    pub failed_jobs_history_limit: u32,
    #[serde(default)]
    pub scaling_strategy: ScalingStrategy,
    pub triggers: Vec<Trigger>,
}

fn default_history_limit() -> u32 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScalingStrategy {
    #[serde(default)]
    pub name: ScalingStrategyName,
    /// Subtracted from the queue length after the percentage is applied
    /// (custom strategy only).
    pub custom_scaling_queue_length_deduction: Option<u32>,
    /// Fraction of the queue length to schedule (custom strategy only).
    pub custom_scaling_running_job_percentage: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScalingStrategyName {
    Default,
    Custom,
    Accurate,
}

impl Default for ScalingStrategyName {
    fn default() -> Self {
        ScalingStrategyName::Default
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaledJobStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
