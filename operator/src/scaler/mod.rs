use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use resources::objects::{hpa::MetricTarget, trigger::MetricType};
use sha2::{Digest, Sha256};

use crate::{auth::ResolvedAuth, error::ScalerError, RUNTIME};

pub mod metrics_api;
pub mod prometheus;
pub mod rabbitmq;

/// One named sample returned by a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
}

/// Result of one poll: the samples plus whether the source has any
/// unprocessed work above the trigger's activation threshold.
#[derive(Debug, Clone)]
pub struct ScalerMetrics {
    pub samples: Vec<MetricSample>,
    pub is_active: bool,
}

/// Metric identifier and target value handed to the HPA.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub target: MetricTarget,
}

impl MetricSpec {
    /// The declared per-replica capacity, regardless of discriminator.
    pub fn target_value(&self) -> u64 {
        match self.target {
            MetricTarget::AverageValue(v) | MetricTarget::Value(v) => v,
        }
    }
}

/// The capability set every event-source poller implements.
///
/// A constructor that succeeds promises that `get_metrics_and_activity`
/// will not panic on invalid configuration; all parameter validation
/// happens up front.
#[async_trait]
pub trait Scaler: Send + Sync + std::fmt::Debug {
    async fn get_metrics_and_activity(
        &self,
        metric_name: &str,
    ) -> Result<ScalerMetrics, ScalerError>;

    fn get_metric_spec_for_scaling(&self) -> Vec<MetricSpec>;

    /// Release source-specific resources. Idempotent.
    async fn close(&self) -> Result<(), ScalerError>;
}

/// Everything a constructor needs: the trigger's parameters, the resolved
/// auth context, and the owner coordinates used for metric naming.
pub struct ScalerContext {
    pub trigger_index: usize,
    pub trigger_type: String,
    pub metadata: BTreeMap<String, String>,
    pub auth: ResolvedAuth,
    pub metric_type: MetricType,
    pub namespace: String,
    pub owner_name: String,
}

impl ScalerContext {
    pub fn required(&self, name: &str) -> Result<&str, ScalerError> {
        self.metadata
            .get(name)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ScalerError::config_param(name, "required parameter missing"))
    }

    pub fn optional(&self, name: &str) -> Option<&str> {
        self.metadata
            .get(name)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Parse an optional numeric parameter, falling back to `default`.
    pub fn parse_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, ScalerError> {
        match self.optional(name) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|_| ScalerError::config_param(name, &format!("malformed value {}", raw))),
            None => Ok(default),
        }
    }

    /// Parse a required numeric parameter.
    pub fn parse_required<T: FromStr>(&self, name: &str) -> Result<T, ScalerError> {
        let raw = self.required(name)?;
        raw.parse::<T>()
            .map_err(|_| ScalerError::config_param(name, &format!("malformed value {}", raw)))
    }

    /// Resolved auth material first, trigger metadata second.
    pub fn auth_or_metadata(&self, name: &str) -> Option<&str> {
        self.auth.get(name).or_else(|| self.optional(name))
    }

    /// External metric name for this trigger. Composition:
    /// `s{index}-{type}-{disambiguator}-{namespace}-{owner}`, normalized.
    /// The index makes the name unique even for identical triggers.
    pub fn metric_name(&self, disambiguator: &str) -> String {
        normalize_metric_name(&format!(
            "s{}-{}-{}-{}-{}",
            self.trigger_index, self.trigger_type, disambiguator, self.namespace, self.owner_name
        ))
    }

    pub fn metric_target(&self, value: u64) -> MetricTarget {
        match self.metric_type {
            MetricType::AverageValue => MetricTarget::AverageValue(value),
            MetricType::Value => MetricTarget::Value(value),
        }
    }

    /// HTTP client with the process-wide default deadline applied.
    pub fn http_client(&self) -> Result<reqwest::Client, ScalerError> {
        reqwest::Client::builder()
            .timeout(RUNTIME.http_default_timeout())
            .build()
            .map_err(|e| ScalerError::Internal(e.to_string()))
    }

    /// Deterministic, order-independent digest over the trigger type, the
    /// normalized parameter map and the auth principal key. Equal
    /// fingerprints within one cache mean the same scaler instance.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.trigger_type.as_bytes());
        hasher.update([0u8]);
        for (key, value) in &self.metadata {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.auth.principal_key.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Lowercase alphanumerics and hyphens only; anything else collapses
/// into a single hyphen.
pub fn normalize_metric_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_hyphen = false;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    out
}

type Constructor = fn(ScalerContext) -> Result<Box<dyn Scaler>, ScalerError>;

lazy_static! {
    /// Process-wide scaler registry: trigger type tag to constructor.
    /// Initialized before any target is admitted.
    static ref CONSTRUCTORS: HashMap<&'static str, Constructor> = {
        let mut m = HashMap::new();
        m.insert("rabbitmq", rabbitmq::RabbitMqScaler::build as Constructor);
        m.insert("prometheus", prometheus::PrometheusScaler::build as Constructor);
        m.insert("metrics-api", metrics_api::MetricsApiScaler::build as Constructor);
        m
    };
}

/// Build the scaler for a trigger. Unknown tags and invalid parameters
/// are Config errors surfaced on the owning resource.
pub fn build_scaler(ctx: ScalerContext) -> Result<Box<dyn Scaler>, ScalerError> {
    let constructor = CONSTRUCTORS.get(ctx.trigger_type.as_str()).ok_or_else(|| {
        ScalerError::Config(format!("unknown trigger type {}", ctx.trigger_type))
    })?;
    constructor(ctx)
}

/// Stands in for a trigger whose credentials could not be resolved.
/// Resolution failures are per trigger and must not take down the whole
/// scaling target: every poll of this scaler reports the stored failure,
/// so the trigger reads as not active, contributes no samples, and
/// advances the fallback counter until a rebuild replaces it.
#[derive(Debug)]
pub struct FailedScaler {
    reason: String,
    spec: MetricSpec,
    closed: AtomicBool,
}

impl FailedScaler {
    pub fn build(ctx: &ScalerContext, error: &ScalerError) -> Box<dyn Scaler> {
        // Target 1 makes a tripped fallback serve replicas x 1, which
        // drives the HPA to exactly the configured replica count
        let spec = MetricSpec {
            name: ctx.metric_name("unresolved"),
            target: ctx.metric_target(1),
        };
        Box::new(Self {
            reason: error.to_string(),
            spec,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Scaler for FailedScaler {
    async fn get_metrics_and_activity(
        &self,
        _metric_name: &str,
    ) -> Result<ScalerMetrics, ScalerError> {
        Err(ScalerError::Auth(self.reason.to_owned()))
    }

    fn get_metric_spec_for_scaling(&self) -> Vec<MetricSpec> {
        vec![self.spec.clone()]
    }

    async fn close(&self) -> Result<(), ScalerError> {
        self.closed.swap(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_context(
    trigger_type: &str,
    pairs: &[(&str, &str)],
) -> ScalerContext {
    let mut metadata = BTreeMap::new();
    for (key, value) in pairs {
        metadata.insert(key.to_string(), value.to_string());
    }
    ScalerContext {
        trigger_index: 0,
        trigger_type: trigger_type.to_string(),
        metadata,
        auth: ResolvedAuth::empty(),
        metric_type: MetricType::AverageValue,
        namespace: "default".to_string(),
        owner_name: "worker".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_normalized() {
        assert_eq!(normalize_metric_name("s0-RabbitMQ-Orders_Q"), "s0-rabbitmq-orders-q");
        assert_eq!(normalize_metric_name("--a//b--"), "a-b");
        assert_eq!(normalize_metric_name("plain-name"), "plain-name");
    }

    #[test]
    fn metric_name_composition_disambiguates() {
        let mut first = test_context("rabbitmq", &[]);
        let mut second = test_context("rabbitmq", &[]);
        second.trigger_index = 1;
        // Identical triggers on one owner still produce distinct names
        assert_ne!(first.metric_name("orders"), second.metric_name("orders"));
        first.owner_name = "other".to_string();
        second.trigger_index = 0;
        second.owner_name = "worker".to_string();
        assert_ne!(first.metric_name("orders"), second.metric_name("orders"));
    }

    #[test]
    fn fingerprint_is_stable_and_parameter_sensitive() {
        let ctx = test_context("rabbitmq", &[("queueName", "orders")]);
        let same = test_context("rabbitmq", &[("queueName", "orders")]);
        assert_eq!(ctx.fingerprint(), same.fingerprint());

        let other_params = test_context("rabbitmq", &[("queueName", "invoices")]);
        assert_ne!(ctx.fingerprint(), other_params.fingerprint());

        let other_type = test_context("prometheus", &[("queueName", "orders")]);
        assert_ne!(ctx.fingerprint(), other_type.fingerprint());
    }

    #[test]
    fn unknown_trigger_type_is_config_error() {
        let ctx = test_context("carrier-pigeon", &[]);
        let err = build_scaler(ctx).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("carrier-pigeon"));
    }
}
