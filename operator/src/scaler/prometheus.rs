use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use super::{MetricSample, MetricSpec, Scaler, ScalerContext, ScalerMetrics};
use crate::error::ScalerError;

/// Evaluates a PromQL instant query against a Prometheus server.
///
/// Parameters: `serverAddress`, `query`, `metricName` (disambiguator,
/// default `prom`), `threshold` (per-replica target), and
/// `activationThreshold` (default 0). Auth: `bearerToken` or
/// `username`/`password` from the resolved auth bundle.
#[derive(Debug)]
pub struct PrometheusScaler {
    server: Url,
    query: String,
    activation_threshold: f64,
    bearer_token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    spec: MetricSpec,
    client: reqwest::Client,
    closed: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct PromQueryResponse {
    status: String,
    data: PromData,
}

#[derive(Debug, Deserialize)]
struct PromData {
    result: Vec<PromResult>,
}

#[derive(Debug, Deserialize)]
struct PromResult {
    /// Instant vector sample: (unix timestamp, rendered value)
    value: (f64, String),
}

impl PrometheusScaler {
    pub fn build(ctx: ScalerContext) -> Result<Box<dyn Scaler>, ScalerError> {
        let server = Url::parse(ctx.required("serverAddress")?)
            .map_err(|e| ScalerError::config_param("serverAddress", &e.to_string()))?;
        let query = ctx.required("query")?.to_string();
        let threshold = ctx.parse_required::<u64>("threshold")?;
        if threshold == 0 {
            return Err(ScalerError::config_param(
                "threshold",
                "must be greater than zero",
            ));
        }
        let activation_threshold = ctx.parse_or("activationThreshold", 0.0)?;
        let disambiguator = ctx.optional("metricName").unwrap_or("prom");

        let spec = MetricSpec {
            name: ctx.metric_name(disambiguator),
            target: ctx.metric_target(threshold),
        };
        let client = ctx.http_client()?;

        Ok(Box::new(Self {
            server,
            query,
            activation_threshold,
            bearer_token: ctx.auth.get("bearerToken").map(|v| v.to_string()),
            username: ctx.auth.get("username").map(|v| v.to_string()),
            password: ctx.auth.get("password").map(|v| v.to_string()),
            spec,
            client,
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl Scaler for PrometheusScaler {
    async fn get_metrics_and_activity(
        &self,
        _metric_name: &str,
    ) -> Result<ScalerMetrics, ScalerError> {
        let url = self
            .server
            .join("api/v1/query")
            .map_err(|e| ScalerError::Internal(e.to_string()))?;
        let mut request = self.client.get(url).query(&[("query", &self.query)]);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        } else if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ScalerError::Source(format!(
                "prometheus returned {}",
                response.status()
            )));
        }
        let body = response.json::<PromQueryResponse>().await?;
        if body.status != "success" {
            return Err(ScalerError::Source(format!(
                "prometheus query status {}",
                body.status
            )));
        }

        // An empty instant vector reads as 0, matching an idle source
        let value = match body.data.result.first() {
            Some(result) => result.value.1.parse::<f64>().map_err(|_| {
                ScalerError::Source(format!("non-numeric sample {}", result.value.1))
            })?,
            None => {
                tracing::debug!("Query {} returned an empty result", self.query);
                0.0
            },
        };

        Ok(ScalerMetrics {
            samples: vec![MetricSample {
                name: self.spec.name.to_owned(),
                value,
            }],
            is_active: value > self.activation_threshold,
        })
    }

    fn get_metric_spec_for_scaling(&self) -> Vec<MetricSpec> {
        vec![self.spec.clone()]
    }

    async fn close(&self) -> Result<(), ScalerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Closed prometheus scaler for query {}", self.query);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler::test_context;

    #[test]
    fn build_validates_parameters() {
        let err = PrometheusScaler::build(test_context(
            "prometheus",
            &[("query", "sum(rate(http_requests_total[1m]))")],
        ))
        .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("serverAddress"));

        let err = PrometheusScaler::build(test_context(
            "prometheus",
            &[
                ("serverAddress", "http://prometheus:9090"),
                ("query", "up"),
                ("threshold", "0"),
            ],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn build_uses_metric_name_disambiguator() {
        let scaler = PrometheusScaler::build(test_context(
            "prometheus",
            &[
                ("serverAddress", "http://prometheus:9090"),
                ("query", "up"),
                ("threshold", "100"),
                ("metricName", "http_requests"),
            ],
        ))
        .unwrap();
        let spec = scaler.get_metric_spec_for_scaling();
        assert_eq!(spec[0].name, "s0-prometheus-http-requests-default-worker");
        assert_eq!(spec[0].target_value(), 100);
    }
}
