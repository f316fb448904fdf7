#[macro_use]
extern crate lazy_static;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, File};
use resources::config::ClusterConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{scaled_job::ScaledJobController, scaled_object::ScaledObjectController};

mod auth;
mod error;
mod metrics_server;
mod platform;
mod scale_handler;
mod scaled_job;
mod scaled_object;
mod scaler;
mod utils;

/// Runtime tuning of the operator process itself.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Port the external metrics endpoint listens on.
    pub metrics_server_port: u16,
    /// Default deadline for scaler HTTP requests, in milliseconds.
    pub keda_http_default_timeout: u64,
    /// Constrains the controllers to one namespace when set.
    pub watch_namespace: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            metrics_server_port: 3100,
            keda_http_default_timeout: 3000,
            watch_namespace: None,
        }
    }
}

impl RuntimeConfig {
    pub fn http_default_timeout(&self) -> Duration {
        Duration::from_millis(self.keda_http_default_timeout)
    }
}

lazy_static! {
    pub static ref CONFIG: ClusterConfig = Config::builder()
        .add_source(File::with_name("/etc/keda/operator.yaml").required(false))
        .set_override_option("apiServerUrl", std::env::var("API_SERVER_URL").ok())
        .unwrap()
        .set_override_option(
            "apiServerWatchUrl",
            std::env::var("API_SERVER_WATCH_URL").ok(),
        )
        .unwrap()
        .build()
        .unwrap_or_default()
        .try_deserialize::<ClusterConfig>()
        .with_context(|| "Failed to parse config".to_string())
        .unwrap_or_default();
    pub static ref RUNTIME: RuntimeConfig = Config::builder()
        .add_source(File::with_name("/etc/keda/operator.yaml").required(false))
        .set_override_option(
            "kedaHttpDefaultTimeout",
            std::env::var("KEDA_HTTP_DEFAULT_TIMEOUT").ok(),
        )
        .unwrap()
        .set_override_option("watchNamespace", std::env::var("WATCH_NAMESPACE").ok())
        .unwrap()
        .set_override_option(
            "metricsServerPort",
            std::env::var("METRICS_SERVER_PORT").ok(),
        )
        .unwrap()
        .build()
        .unwrap_or_default()
        .try_deserialize::<RuntimeConfig>()
        .with_context(|| "Failed to parse config".to_string())
        .unwrap_or_default();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::from_path("/etc/keda/operator.env").ok();
    tracing_subscriber::fmt::init();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api = platform::ApiClient::new();
    let handler = scale_handler::ScaleHandler::new(api.clone(), shutdown_rx.clone());

    let mut metrics_server =
        tokio::spawn(metrics_server::serve(handler.clone(), shutdown_rx.clone()));

    let mut so_controller = ScaledObjectController::new(handler.clone(), api.clone());
    let mut sj_controller = ScaledJobController::new(handler.clone(), api);
    let mut so_handle = tokio::spawn(async move { so_controller.run().await });
    let mut sj_handle = tokio::spawn(async move { sj_controller.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        result = &mut so_handle => {
            result??;
            return Err(anyhow!("ScaledObject controller exited unexpectedly"));
        },
        result = &mut sj_handle => {
            result??;
            return Err(anyhow!("ScaledJob controller exited unexpectedly"));
        },
        result = &mut metrics_server => {
            result??;
            return Err(anyhow!("External metrics endpoint exited unexpectedly"));
        },
    }

    tracing::info!("Shutting down");
    shutdown_tx.send(true).ok();
    handler.shutdown().await;
    so_handle.abort();
    sj_handle.abort();
    metrics_server.await??;
    Ok(())
}
