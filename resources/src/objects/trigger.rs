use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One input signal (source, configuration and optional auth)
/// attached to a scaled resource.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Tag of the scaler to build, e.g. `rabbitmq`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Scaler specific parameters. The recognized set is per type;
    /// constructors reject unknown or malformed values up front.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Names the TriggerAuthentication to resolve credentials from.
    pub authentication_ref: Option<AuthenticationRef>,
    /// Overrides how the HPA interprets the metric target.
    /// Defaults to AverageValue.
    pub metric_type: Option<MetricType>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthenticationRef {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Target is divided by the current replica count before comparison.
    AverageValue,
    /// Target is compared against the raw metric value.
    Value,
}

impl Default for MetricType {
    fn default() -> Self {
        MetricType::AverageValue
    }
}
