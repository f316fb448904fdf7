use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Url;

use super::{MetricSample, MetricSpec, Scaler, ScalerContext, ScalerMetrics};
use crate::error::ScalerError;

/// Reads a numeric value out of an arbitrary JSON HTTP endpoint.
///
/// Parameters: `url`, `valueLocation` (dotted path into the response
/// body), `targetValue` (per-replica target), `activationTargetValue`
/// (default 0). Auth: `bearerToken` or `username`/`password`.
#[derive(Debug)]
pub struct MetricsApiScaler {
    url: Url,
    value_location: String,
    activation_target: f64,
    bearer_token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    spec: MetricSpec,
    client: reqwest::Client,
    closed: AtomicBool,
}

impl MetricsApiScaler {
    pub fn build(ctx: ScalerContext) -> Result<Box<dyn Scaler>, ScalerError> {
        let url = Url::parse(ctx.required("url")?)
            .map_err(|e| ScalerError::config_param("url", &e.to_string()))?;
        let value_location = ctx.required("valueLocation")?.to_string();
        let target_value = ctx.parse_required::<u64>("targetValue")?;
        if target_value == 0 {
            return Err(ScalerError::config_param(
                "targetValue",
                "must be greater than zero",
            ));
        }
        let activation_target = ctx.parse_or("activationTargetValue", 0.0)?;

        let spec = MetricSpec {
            name: ctx.metric_name(&value_location),
            target: ctx.metric_target(target_value),
        };
        let client = ctx.http_client()?;

        Ok(Box::new(Self {
            url,
            value_location,
            activation_target,
            bearer_token: ctx.auth.get("bearerToken").map(|v| v.to_string()),
            username: ctx.auth.get("username").map(|v| v.to_string()),
            password: ctx.auth.get("password").map(|v| v.to_string()),
            spec,
            client,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Follow a dotted path into a JSON document and read the number there.
/// Numeric strings are accepted, everything else is a Source error.
fn extract_value(body: &serde_json::Value, path: &str) -> Result<f64, ScalerError> {
    let mut cursor = body;
    for segment in path.split('.') {
        cursor = cursor.get(segment).ok_or_else(|| {
            ScalerError::Source(format!("valueLocation {} not present in response", path))
        })?;
    }
    match cursor {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ScalerError::Source(format!("value at {} is not finite", path))),
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| ScalerError::Source(format!("value at {} is not numeric: {}", path, s))),
        other => Err(ScalerError::Source(format!(
            "value at {} has unsupported type: {}",
            path, other
        ))),
    }
}

#[async_trait]
impl Scaler for MetricsApiScaler {
    async fn get_metrics_and_activity(
        &self,
        _metric_name: &str,
    ) -> Result<ScalerMetrics, ScalerError> {
        let mut request = self.client.get(self.url.clone());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        } else if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ScalerError::Source(format!(
                "endpoint returned {}",
                response.status()
            )));
        }
        let body = response.json::<serde_json::Value>().await?;
        let value = extract_value(&body, &self.value_location)?;

        Ok(ScalerMetrics {
            samples: vec![MetricSample {
                name: self.spec.name.to_owned(),
                value,
            }],
            is_active: value > self.activation_target,
        })
    }

    fn get_metric_spec_for_scaling(&self) -> Vec<MetricSpec> {
        vec![self.spec.clone()]
    }

    async fn close(&self) -> Result<(), ScalerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Closed metrics-api scaler for {}", self.url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::scaler::test_context;

    #[test]
    fn extract_value_follows_dotted_paths() {
        let body = json!({"queue": {"backlog": {"size": 42}}});
        assert_eq!(extract_value(&body, "queue.backlog.size").unwrap(), 42.0);

        let body = json!({"depth": "17.5"});
        assert_eq!(extract_value(&body, "depth").unwrap(), 17.5);

        let body = json!({"depth": [1, 2]});
        assert!(extract_value(&body, "depth").is_err());
        assert!(extract_value(&body, "missing").is_err());
    }

    #[test]
    fn build_validates_parameters() {
        let err = MetricsApiScaler::build(test_context(
            "metrics-api",
            &[("url", "not a url"), ("valueLocation", "x"), ("targetValue", "5")],
        ))
        .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("url"));

        let err = MetricsApiScaler::build(test_context(
            "metrics-api",
            &[("url", "http://api:8080/backlog"), ("targetValue", "5")],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("valueLocation"));
    }
}
