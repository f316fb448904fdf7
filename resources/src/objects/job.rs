use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{pod::PodTemplateSpec, Metadata, Object};

/// Job runs a pod to completion once. The scaled-job scheduler creates
/// one Job per unit of queued work, up to its concurrency ceiling.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Job {
    pub metadata: Metadata,
    pub spec: JobSpec,
    pub status: Option<JobStatus>,
}

impl Object for Job {
    fn kind(&self) -> &'static str {
        "Job"
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn uri(&self) -> String {
        format!("/api/v1/jobs/{}", self.metadata.name)
    }
}

impl Job {
    pub fn phase(&self) -> JobPhase {
        self.status
            .as_ref()
            .map(|s| s.phase.clone())
            .unwrap_or(JobPhase::Pending)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Describes the pod that runs the work item.
    pub template: PodTemplateSpec,
    /// Number of retries before marking this job failed. Defaults to 6.
    #[serde(default = "default_back_off_limit")]
    pub back_off_limit: u32,
}

fn default_back_off_limit() -> u32 {
    6
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub enum JobPhase {
    /// Accepted but its pod has not started running.
    Pending,
    /// The pod is running.
    Running,
    /// The pod terminated in success.
    Succeeded,
    /// The pod terminated in failure after exhausting its retries.
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub phase: JobPhase,
    pub start_time: Option<NaiveDateTime>,
    /// Set when the job reaches a terminal phase.
    pub completion_time: Option<NaiveDateTime>,
}
