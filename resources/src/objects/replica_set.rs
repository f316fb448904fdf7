use serde::{Deserialize, Serialize};

use super::{pod::PodTemplateSpec, Labels, Metadata, Object};

/// ReplicaSet ensures that a specified number of pod replicas are running
/// at any given time. It is the deployment-like workload the autoscaling
/// core drives the replica count of.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReplicaSet {
    pub metadata: Metadata,
    pub spec: ReplicaSetSpec,
    /// The most recently observed status. Populated by the system.
    pub status: Option<ReplicaSetStatus>,
}

impl Object for ReplicaSet {
    fn kind(&self) -> &'static str {
        "ReplicaSet"
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn uri(&self) -> String {
        format!("/api/v1/replicasets/{}", self.metadata.name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReplicaSetSpec {
    /// A label query over pods that should match the replica count.
    pub selector: Labels,
    /// The pod that will be created if insufficient replicas are detected.
    pub template: PodTemplateSpec,
    /// The number of desired replicas. Defaults to 1.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetStatus {
    /// The most recently observed number of replicas.
    pub replicas: u32,
    /// The number of pods targeted by this ReplicaSet with a Ready condition.
    pub ready_replicas: u32,
}
