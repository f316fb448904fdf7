use serde::{Deserialize, Serialize};

use super::Metadata;

/// Template for the pods a workload creates.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PodTemplateSpec {
    pub metadata: Metadata,
    pub spec: PodSpec,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PodSpec {
    /// List of containers belonging to the pod.
    /// There must be at least one container in a Pod.
    pub containers: Vec<Container>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Container {
    /// Name of the container specified as a DNS_LABEL.
    pub name: String,
    /// Image name.
    pub image: String,
    /// Environment variables set in the container.
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}
