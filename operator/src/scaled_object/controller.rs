use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{Error, Result};
use chrono::Local;
use futures_delay_queue::{delay_queue, DelayQueue};
use futures_intrusive::{buffer::GrowingHeapBuf, channel::shared::GenericReceiver};
use parking_lot::RawMutex;
use resources::{
    informer::Store,
    objects::{
        condition::{set_condition, ConditionType},
        hpa::{
            ExternalMetricSource, HorizontalPodAutoscaler, HorizontalPodAutoscalerBehavior,
            HorizontalPodAutoscalerSpec,
        },
        scaled_object::ScaledObject,
        KubeObject, Metadata, Object,
    },
};
use tokio::{
    select,
    sync::{mpsc, mpsc::Receiver},
    task::JoinHandle,
};

use crate::{
    error::ScalerError,
    platform::ApiClient,
    scale_handler::ScaleHandler,
    scaler::MetricSpec,
    utils::{create_informer, watched, Event, ResyncNotification},
};

/// Requeue period for a healthy object.
const SYNC_PERIOD: u64 = 30;
/// Exponential backoff bounds for failed reconciles.
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_MAX_SECS: u64 = 300;

/// Translates ScaledObject lifecycle events into scale handler
/// operations and keeps the derived HPA in step with the declared spec.
/// Reconciliation is idempotent and level triggered.
pub struct ScaledObjectController {
    rx: Receiver<Event<ScaledObject>>,
    resync_rx: Receiver<ResyncNotification>,
    informer: Option<JoinHandle<Result<(), Error>>>,
    store: Store<ScaledObject>,

    handler: Arc<ScaleHandler>,
    api: ApiClient,

    work_queue: DelayQueue<String, GrowingHeapBuf<String>>,
    work_queue_rx: GenericReceiver<RawMutex, String, GrowingHeapBuf<String>>,
    in_queue: HashSet<String>,
    retries: HashMap<String, u32>,
}

impl ScaledObjectController {
    pub fn new(handler: Arc<ScaleHandler>, api: ApiClient) -> Self {
        let (tx, rx) = mpsc::channel::<Event<ScaledObject>>(16);
        let (resync_tx, resync_rx) = mpsc::channel::<ResyncNotification>(16);
        let informer = create_informer::<ScaledObject>("scaledobjects".to_string(), tx, resync_tx);
        let store = informer.get_store();
        let informer = tokio::spawn(async move { informer.run().await });

        let (work_queue, work_queue_rx) = delay_queue::<String>();

        Self {
            rx,
            resync_rx,
            informer: Some(informer),
            store,
            handler,
            api,
            work_queue,
            work_queue_rx,
            in_queue: HashSet::new(),
            retries: HashMap::new(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("ScaledObject controller started");

        loop {
            select! {
                Some(event) = self.rx.recv() => {
                    match event {
                        Event::Add(so) | Event::Update(_, so) => {
                            if !watched(&so.metadata) {
                                continue;
                            }
                            let name = so.metadata.name;
                            self.in_queue.insert(name.to_owned());
                            self.work_queue.insert_at(name, std::time::Instant::now());
                        },
                        Event::Delete(so) => {
                            if !watched(&so.metadata) {
                                continue;
                            }
                            self.handle_delete(so).await;
                        },
                    }
                },
                Some(_) = self.resync_rx.recv() => {
                    self.handle_resync().await;
                },
                Some(name) = self.work_queue_rx.receive() => {
                    self.in_queue.remove(&name);
                    // Clone the object and drop the reference,
                    // otherwise the informer may deadlock when handling watch events
                    let object = self
                        .store
                        .get(&format!("/api/v1/scaledobjects/{}", name))
                        .map(|object| object.clone());
                    match object {
                        Some(object) => self.process(object).await,
                        None => {
                            // Deletion is handled on the watch event; a
                            // store miss here only means the item raced it
                            tracing::debug!("ScaledObject {} no longer in store", name);
                        },
                    }
                },
                else => break
            }
        }

        let informer = std::mem::replace(&mut self.informer, None);
        informer.unwrap().await??;
        tracing::info!("ScaledObject controller exited");
        Ok(())
    }

    async fn process(&mut self, so: ScaledObject) {
        let name = so.metadata.name.to_owned();
        match self.reconcile(&so).await {
            Ok(()) => {
                self.retries.remove(&name);
                self.enqueue(&name, std::time::Duration::from_secs(SYNC_PERIOD));
            },
            Err(e) => {
                tracing::error!("Error reconciling ScaledObject {}: {:#}", name, e);
                self.record_failure(&so, &e).await;
                if e.is_config() {
                    // Nothing to retry; the next spec change re-enqueues
                    self.retries.remove(&name);
                } else {
                    let attempt = self.retries.entry(name.to_owned()).or_insert(0);
                    *attempt += 1;
                    let delay = BACKOFF_MAX_SECS
                        .min(BACKOFF_BASE_SECS << (*attempt - 1).min(16))
                        .max(BACKOFF_BASE_SECS);
                    self.enqueue(&name, std::time::Duration::from_secs(delay));
                }
            },
        }
    }

    async fn reconcile(&self, so: &ScaledObject) -> Result<(), ScalerError> {
        // Paused objects pin their target and release every scaler
        if let Some(pinned) = so.paused_replicas() {
            return self.reconcile_paused(so, pinned).await;
        }

        validate(so)?;

        let original_replica_count = self.observed_original_replicas(so).await?;

        let specs = self.handler.upsert_scaled_object(so.clone()).await?;
        self.ensure_hpa(so, &specs).await?;
        self.update_ready_status(so, &specs, original_replica_count)
            .await;
        Ok(())
    }

    async fn reconcile_paused(&self, so: &ScaledObject, pinned: u32) -> Result<(), ScalerError> {
        let id = ScaleHandler::scaled_object_id(so);
        if self.handler.remove_target(&id).await {
            tracing::info!("Suspended polling for paused ScaledObject {}", so.name());
        }
        let rs = self
            .api
            .get_replica_set(&so.spec.scale_target_ref.name)
            .await
            .map_err(|e| ScalerError::Platform(format!("{:#}", e)))?;
        if rs.spec.replicas != pinned {
            self.api
                .scale_replica_set(rs, pinned)
                .await
                .map_err(|e| ScalerError::Platform(format!("{:#}", e)))?;
        }
        let mut status = so.status.to_owned().unwrap_or_default();
        set_condition(
            &mut status.conditions,
            ConditionType::Ready,
            true,
            "ScaledObjectPaused",
            &format!("autoscaling is paused at {} replicas", pinned),
            Local::now().naive_utc(),
        );
        self.post_status(so, status).await;
        Ok(())
    }

    /// Record the replica count found before the core took over, so it
    /// can be written back on deletion.
    async fn observed_original_replicas(
        &self,
        so: &ScaledObject,
    ) -> Result<Option<u32>, ScalerError> {
        if !so.spec.advanced.restore_to_original_replica_count {
            return Ok(None);
        }
        if let Some(existing) = so.status.as_ref().and_then(|s| s.original_replica_count) {
            return Ok(Some(existing));
        }
        let rs = self
            .api
            .get_replica_set(&so.spec.scale_target_ref.name)
            .await
            .map_err(|e| ScalerError::Platform(format!("{:#}", e)))?;
        Ok(Some(rs.spec.replicas))
    }

    /// Create the derived HPA, or patch it when the desired spec moved.
    async fn ensure_hpa(&self, so: &ScaledObject, specs: &[MetricSpec]) -> Result<(), ScalerError> {
        let desired = build_hpa(so, specs);
        let existing = self
            .api
            .get_hpa(&so.hpa_name())
            .await
            .map_err(|e| ScalerError::Platform(format!("{:#}", e)))?;
        match existing {
            None => {
                self.api
                    .create_hpa(desired)
                    .await
                    .map_err(|e| ScalerError::Platform(format!("{:#}", e)))?;
            },
            Some(mut current) => {
                if current.spec != desired.spec {
                    current.spec = desired.spec;
                    self.api
                        .put_object(&KubeObject::HorizontalPodAutoscaler(current))
                        .await
                        .map_err(|e| ScalerError::Platform(format!("{:#}", e)))?;
                    tracing::info!("Patched HPA {} for ScaledObject {}", so.hpa_name(), so.name());
                }
            },
        }
        Ok(())
    }

    async fn update_ready_status(
        &self,
        so: &ScaledObject,
        specs: &[MetricSpec],
        original_replica_count: Option<u32>,
    ) {
        let mut status = so.status.to_owned().unwrap_or_default();
        let flipped = set_condition(
            &mut status.conditions,
            ConditionType::Ready,
            true,
            "ScaledObjectReady",
            "scalers are built and the HPA is in place",
            Local::now().naive_utc(),
        );
        status.external_metric_names = specs.iter().map(|spec| spec.name.to_owned()).collect();
        if original_replica_count.is_some() {
            status.original_replica_count = original_replica_count;
        }
        let changed = so.status.as_ref() != Some(&status);
        if changed {
            self.post_status(so, status).await;
        }
        if flipped {
            self.api
                .post_event(
                    so.object_reference(),
                    "ScaledObjectReady",
                    "ScaledObject is ready for scaling",
                )
                .await;
        }
    }

    /// Surface a reconcile failure on the Ready condition, identifying
    /// the offending trigger configuration.
    async fn record_failure(&self, so: &ScaledObject, error: &ScalerError) {
        let mut status = so.status.to_owned().unwrap_or_default();
        let flipped = set_condition(
            &mut status.conditions,
            ConditionType::Ready,
            false,
            "ScaledObjectCheckFailed",
            &error.to_string(),
            Local::now().naive_utc(),
        );
        self.post_status(so, status).await;
        if flipped {
            self.api
                .post_event(so.object_reference(), "ScaledObjectCheckFailed", &error.to_string())
                .await;
        }
    }

    async fn post_status(&self, so: &ScaledObject, status: resources::objects::scaled_object::ScaledObjectStatus) {
        let mut so = so.clone();
        so.status = Some(status);
        if let Err(e) = self.api.put_object(&KubeObject::ScaledObject(so)).await {
            tracing::warn!("Failed to post ScaledObject status: {:#}", e);
        }
    }

    async fn handle_delete(&mut self, so: ScaledObject) {
        let name = so.metadata.name.to_owned();
        tracing::info!("ScaledObject {} deleted", name);
        let id = ScaleHandler::scaled_object_id(&so);
        self.handler.remove_target(&id).await;
        self.retries.remove(&name);

        if let Err(e) = self.api.delete_hpa(&so.hpa_name()).await {
            tracing::warn!("Failed to delete HPA {}: {:#}", so.hpa_name(), e);
        }
        if so.spec.advanced.restore_to_original_replica_count {
            if let Some(original) = so.status.as_ref().and_then(|s| s.original_replica_count) {
                match self.api.get_replica_set(&so.spec.scale_target_ref.name).await {
                    Ok(rs) => {
                        if let Err(e) = self.api.scale_replica_set(rs, original).await {
                            tracing::warn!(
                                "Failed to restore {} to {} replicas: {:#}",
                                so.spec.scale_target_ref.name,
                                original,
                                e
                            );
                        }
                    },
                    Err(e) => tracing::warn!(
                        "Failed to fetch {} for replica restore: {:#}",
                        so.spec.scale_target_ref.name,
                        e
                    ),
                }
            }
        }
    }

    /// Re-enqueue the whole working set and drop scale handler targets
    /// whose ScaledObject vanished while the watch was down.
    async fn handle_resync(&mut self) {
        let objects: Vec<ScaledObject> = self
            .store
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut live = HashSet::new();
        for so in &objects {
            if !watched(&so.metadata) {
                continue;
            }
            live.insert(ScaleHandler::scaled_object_id(so));
            let name = &so.metadata.name;
            if !self.in_queue.contains(name) {
                self.in_queue.insert(name.to_owned());
                self.work_queue
                    .insert_at(name.to_owned(), std::time::Instant::now());
            }
        }

        for id in self.handler.active_target_ids().await {
            if id.starts_with("scaledobject/") && !live.contains(&id) {
                tracing::info!("Removing stale scaling target {}", id);
                self.handler.remove_target(&id).await;
                if let Some(name) = id.rsplit('/').next() {
                    if let Err(e) = self.api.delete_hpa(&format!("keda-hpa-{}", name)).await {
                        tracing::warn!("Failed to delete stale HPA for {}: {:#}", id, e);
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, name: &String, delay: std::time::Duration) {
        if !self.in_queue.contains(name) {
            self.in_queue.insert(name.to_owned());
            self.work_queue.insert(name.to_owned(), delay);
        }
    }
}

fn validate(so: &ScaledObject) -> Result<(), ScalerError> {
    if so.spec.triggers.is_empty() {
        return Err(ScalerError::Config(
            "at least one trigger is required".to_string(),
        ));
    }
    if so.spec.max_replica_count == 0 {
        return Err(ScalerError::config_param(
            "maxReplicaCount",
            "must be greater than zero",
        ));
    }
    if so.spec.min_replica_count > so.spec.max_replica_count {
        return Err(ScalerError::config_param(
            "minReplicaCount",
            "must not exceed maxReplicaCount",
        ));
    }
    if so.spec.polling_interval == 0 {
        return Err(ScalerError::config_param(
            "pollingInterval",
            "must be greater than zero",
        ));
    }
    if let Some(idle) = so.spec.idle_replica_count {
        if idle != 0 {
            return Err(ScalerError::config_param(
                "idleReplicaCount",
                "only 0 is supported",
            ));
        }
    }
    if let Some(fallback) = &so.spec.fallback {
        if fallback.failure_threshold == 0 {
            return Err(ScalerError::config_param(
                "fallback.failureThreshold",
                "must be greater than zero",
            ));
        }
    }
    Ok(())
}

/// The derived HPA: external metric targets from the scaler specs, the
/// declared bounds, and any behavior passthrough. `minReplicas` is never
/// 0; the zero boundary belongs to the poll loop, not the HPA.
fn build_hpa(so: &ScaledObject, specs: &[MetricSpec]) -> HorizontalPodAutoscaler {
    let behavior = so
        .spec
        .advanced
        .horizontal_pod_autoscaler_config
        .as_ref()
        .and_then(|config| config.behavior.to_owned())
        .unwrap_or_else(HorizontalPodAutoscalerBehavior::default);
    let metadata = Metadata {
        name: so.hpa_name(),
        namespace: so.metadata.namespace.to_owned(),
        labels: so.metadata.labels.clone(),
        owner_references: vec![so.object_reference()],
        ..Default::default()
    };
    HorizontalPodAutoscaler {
        metadata,
        spec: HorizontalPodAutoscalerSpec {
            scale_target_ref: so.spec.scale_target_ref.clone(),
            min_replicas: so.spec.min_replica_count.max(1),
            max_replicas: so.spec.max_replica_count,
            behavior,
            metrics: specs
                .iter()
                .map(|spec| ExternalMetricSource {
                    name: spec.name.to_owned(),
                    target: spec.target.clone(),
                })
                .collect(),
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use resources::objects::{
        hpa::MetricTarget,
        object_reference::ObjectReference,
        scaled_object::{Advanced, Fallback, ScaledObjectSpec},
        trigger::Trigger,
    };

    use super::*;

    fn scaled_object(min: u32, max: u32) -> ScaledObject {
        ScaledObject {
            metadata: Metadata {
                name: "worker".to_string(),
                ..Default::default()
            },
            spec: ScaledObjectSpec {
                scale_target_ref: ObjectReference {
                    kind: "ReplicaSet".to_string(),
                    name: "worker".to_string(),
                },
                min_replica_count: min,
                max_replica_count: max,
                polling_interval: 30,
                cooldown_period: 300,
                idle_replica_count: None,
                fallback: None,
                advanced: Advanced::default(),
                triggers: vec![Trigger {
                    type_: "rabbitmq".to_string(),
                    metadata: BTreeMap::new(),
                    authentication_ref: None,
                    metric_type: None,
                }],
            },
            status: None,
        }
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        assert!(validate(&scaled_object(0, 10)).is_ok());
        assert!(validate(&scaled_object(5, 3)).unwrap_err().is_config());
        assert!(validate(&scaled_object(0, 0)).unwrap_err().is_config());

        let mut so = scaled_object(0, 10);
        so.spec.triggers.clear();
        assert!(validate(&so).unwrap_err().is_config());

        let mut so = scaled_object(0, 10);
        so.spec.idle_replica_count = Some(2);
        assert!(validate(&so).unwrap_err().is_config());

        // idle 0 is valid whatever the floor; activation lifts to
        // minReplicaCount, or to 1 when the floor is 0
        let mut so = scaled_object(0, 10);
        so.spec.idle_replica_count = Some(0);
        assert!(validate(&so).is_ok());
        let mut so = scaled_object(2, 10);
        so.spec.idle_replica_count = Some(0);
        assert!(validate(&so).is_ok());

        let mut so = scaled_object(0, 10);
        so.spec.fallback = Some(Fallback {
            failure_threshold: 0,
            replicas: 2,
        });
        assert!(validate(&so).unwrap_err().is_config());
    }

    #[test]
    fn derived_hpa_never_has_zero_min_replicas() {
        let specs = vec![MetricSpec {
            name: "s0-rabbitmq-orders-default-worker".to_string(),
            target: MetricTarget::AverageValue(10),
        }];
        let hpa = build_hpa(&scaled_object(0, 10), &specs);
        assert_eq!(hpa.spec.min_replicas, 1);
        assert_eq!(hpa.spec.max_replicas, 10);
        assert_eq!(hpa.metadata.name, "keda-hpa-worker");
        assert_eq!(hpa.spec.metrics.len(), 1);
        assert_eq!(
            hpa.spec.metrics[0].target,
            MetricTarget::AverageValue(10)
        );
        assert_eq!(
            hpa.metadata.owner_references[0],
            ObjectReference {
                kind: "ScaledObject".to_string(),
                name: "worker".to_string(),
            }
        );

        let hpa = build_hpa(&scaled_object(3, 10), &specs);
        assert_eq!(hpa.spec.min_replicas, 3);
    }
}
