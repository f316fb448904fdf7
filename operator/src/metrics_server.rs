use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{extract::Path, routing::get, Extension, Json, Router};
use axum_macros::debug_handler;
use chrono::{Local, NaiveDateTime};
use resources::models::ErrResponse;
use serde::Serialize;
use tokio::sync::watch;

use crate::{error::ScalerError, scale_handler::ScaleHandler, RUNTIME};

/// Reply shape of the external metrics contract consumed by the HPA.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricValueList {
    kind: &'static str,
    api_version: &'static str,
    items: Vec<ExternalMetricValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricValue {
    metric_name: String,
    /// Decimal SI quantity.
    value: String,
    timestamp: NaiveDateTime,
    selector: Option<String>,
}

/// Render a sample as a decimal SI quantity: whole numbers plainly,
/// fractional ones in milli units.
pub fn format_quantity(value: f64) -> String {
    let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
    let milli = (value * 1000.0).round() as u64;
    if milli % 1000 == 0 {
        format!("{}", milli / 1000)
    } else {
        format!("{}m", milli)
    }
}

#[debug_handler]
async fn get_external_metric(
    Extension(handler): Extension<Arc<ScaleHandler>>,
    Path((_namespace, metric_name)): Path<(String, String)>,
) -> Result<Json<ExternalMetricValueList>, ErrResponse> {
    match handler.serve_metric(&metric_name).await {
        Ok(sample) => Ok(Json(ExternalMetricValueList {
            kind: "ExternalMetricValueList",
            api_version: "external.metrics.k8s.io/v1beta1",
            items: vec![ExternalMetricValue {
                metric_name: sample.name,
                value: format_quantity(sample.value),
                timestamp: Local::now().naive_utc(),
                selector: None,
            }],
        })),
        Err(ScalerError::Config(cause)) => Err(ErrResponse::not_found(
            format!("Error getting metric {}", metric_name),
            Some(cause),
        )),
        // A registry route pointing at a missing target or scaler means
        // a rebuild is in flight; the HPA should simply ask again
        Err(ScalerError::Internal(cause)) => Err(ErrResponse::service_unavailable(
            format!("Error getting metric {}", metric_name),
            Some(cause),
        )),
        Err(e) => Err(ErrResponse::new(
            format!("Error getting metric {}", metric_name),
            Some(e.to_string()),
        )),
    }
}

pub async fn serve(
    handler: Arc<ScaleHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = Router::new()
        .route(
            "/apis/external.metrics.k8s.io/v1beta1/namespaces/:namespace/:metric_name",
            get(get_external_metric),
        )
        .layer(Extension(handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], RUNTIME.metrics_server_port));
    tracing::info!("External metrics endpoint listening at {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
        .with_context(|| "External metrics endpoint failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_render_in_decimal_si() {
        assert_eq!(format_quantity(5.0), "5");
        assert_eq!(format_quantity(0.0), "0");
        assert_eq!(format_quantity(1.5), "1500m");
        assert_eq!(format_quantity(0.25), "250m");
        // Negative and non finite samples clamp to zero
        assert_eq!(format_quantity(-3.0), "0");
        assert_eq!(format_quantity(f64::NAN), "0");
    }
}
