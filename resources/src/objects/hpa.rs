use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{object_reference::ObjectReference, Metadata, Object};

/// HorizontalPodAutoscaler drives the replica count of a workload towards
/// its metric targets. The autoscaling core derives one per ScaledObject;
/// the HPA owns the `current > 0` range while the core owns the zero
/// boundary, so `min_replicas` here is never 0.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HorizontalPodAutoscaler {
    pub metadata: Metadata,
    pub spec: HorizontalPodAutoscalerSpec,
    pub status: Option<HorizontalPodAutoscalerStatus>,
}

impl Object for HorizontalPodAutoscaler {
    fn kind(&self) -> &'static str {
        "HorizontalPodAutoscaler"
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn uri(&self) -> String {
        format!("/api/v1/horizontalpodautoscalers/{}", self.metadata.name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalPodAutoscalerSpec {
    /// The upper limit for the number of replicas
    /// to which the autoscaler can scale up.
    pub max_replicas: u32,
    /// The lower limit for the number of replicas
    /// to which the autoscaler can scale down. Defaults to 1.
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    /// Points to the target resource to scale.
    pub scale_target_ref: ObjectReference,
    /// Configures the scaling behavior of the target
    /// in both Up and Down directions.
    #[serde(default)]
    pub behavior: HorizontalPodAutoscalerBehavior,
    /// External metric sources to compute the desired replica count from.
    /// The maximum replica count across all metrics is used.
    pub metrics: Vec<ExternalMetricSource>,
}

fn default_min_replicas() -> u32 {
    1
}

/// An external metric source: a named signal served by the
/// autoscaling core's metrics endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExternalMetricSource {
    /// Globally unique external metric name.
    pub name: String,
    /// Target value for the given metric.
    pub target: MetricTarget,
}

/// MetricTarget defines the target value or average value of a metric.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum MetricTarget {
    /// Target for the metric value divided by the current replica count,
    /// i.e. the declared per replica capacity.
    AverageValue(u64),
    /// Target for the raw metric value.
    Value(u64),
}

/// HorizontalPodAutoscalerBehavior configures the scaling behavior
/// of the target in both Up and Down directions
/// (scaleUp and scaleDown fields respectively).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalPodAutoscalerBehavior {
    /// Scaling policy for scaling Down.
    /// If not set, the default value is to allow to scale down
    /// to minReplicas pods, with a 60 second stabilization window.
    #[serde(default = "default_scale_down_behavior")]
    pub scale_down: HPAScalingRules,
    /// Scaling policy for scaling Up.
    /// If not set, the default value is the higher of:
    /// - increase no more than 4 pods per 60 seconds
    /// - double the number of pods per 60 seconds
    /// No stabilization is used.
    #[serde(default = "default_scale_up_behavior")]
    pub scale_up: HPAScalingRules,
}

fn default_scale_down_behavior() -> HPAScalingRules {
    HPAScalingRules {
        policies: vec![HPAScalingPolicy {
            type_: ScalingPolicyType::Percent,
            value: 100,
            period_seconds: 60,
        }],
        select_policy: PolicySelection::Max,
        stabilization_window_seconds: 60,
    }
}

fn default_scale_up_behavior() -> HPAScalingRules {
    HPAScalingRules {
        policies: vec![
            HPAScalingPolicy {
                type_: ScalingPolicyType::Pods,
                value: 4,
                period_seconds: 60,
            },
            HPAScalingPolicy {
                type_: ScalingPolicyType::Percent,
                value: 100,
                period_seconds: 60,
            },
        ],
        select_policy: PolicySelection::Max,
        stabilization_window_seconds: 0,
    }
}

impl Default for HorizontalPodAutoscalerBehavior {
    fn default() -> Self {
        HorizontalPodAutoscalerBehavior {
            scale_down: default_scale_down_behavior(),
            scale_up: default_scale_up_behavior(),
        }
    }
}

/// HPAScalingRules configures the scaling behavior for one direction.
/// They can limit the scaling velocity by specifying scaling policies
/// and prevent flapping by specifying the stabilization window.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HPAScalingRules {
    /// A list of potential scaling polices which can be used during scaling.
    /// At least one policy must be specified.
    pub policies: Vec<HPAScalingPolicy>,
    /// Specify which policy should be used.
    /// If not set, the default value Max is used.
    #[serde(default)]
    pub select_policy: PolicySelection,
    /// Number of seconds for which past recommendations should be considered
    /// while scaling up or scaling down.
    pub stabilization_window_seconds: u32,
}

/// PolicySelection describes how to choose a policy from multiple ones.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum PolicySelection {
    /// Select the policy with the lowest recommendation value.
    Min,
    /// Select the policy with the highest recommendation value.
    Max,
    /// Disable current action.
    Disabled,
}

impl Default for PolicySelection {
    fn default() -> Self {
        PolicySelection::Max
    }
}

/// HPAScalingPolicy is a single policy
/// which must hold true for a specified past interval.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HPAScalingPolicy {
    #[serde(rename = "type")]
    pub type_: ScalingPolicyType,
    /// Contains the amount of change which is permitted by the policy.
    /// It must be greater than zero.
    pub value: u32,
    /// Specifies the window of time for which the policy should hold true.
    pub period_seconds: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ScalingPolicyType {
    Pods,
    Percent,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalPodAutoscalerStatus {
    /// Desired number of replicas as last calculated by the autoscaler.
    pub desired_replicas: u32,
    /// Current number of replicas as last seen by the autoscaler.
    pub current_replicas: u32,
    /// Last time the autoscaler scaled the number of pods.
    pub last_scale_time: Option<NaiveDateTime>,
}
