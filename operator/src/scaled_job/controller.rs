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
        scaled_job::ScaledJob,
        KubeObject,
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
    utils::{create_informer, watched, Event, ResyncNotification},
};

const SYNC_PERIOD: u64 = 30;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_MAX_SECS: u64 = 300;

/// Admits ScaledJobs into the scale handler's job scheduler and keeps
/// their Ready condition current. No HPA is derived: job scheduling is
/// decided tick by tick from queue depth.
pub struct ScaledJobController {
    rx: Receiver<Event<ScaledJob>>,
    resync_rx: Receiver<ResyncNotification>,
    informer: Option<JoinHandle<Result<(), Error>>>,
    store: Store<ScaledJob>,

    handler: Arc<ScaleHandler>,
    api: ApiClient,

    work_queue: DelayQueue<String, GrowingHeapBuf<String>>,
    work_queue_rx: GenericReceiver<RawMutex, String, GrowingHeapBuf<String>>,
    in_queue: HashSet<String>,
    retries: HashMap<String, u32>,
}

impl ScaledJobController {
    pub fn new(handler: Arc<ScaleHandler>, api: ApiClient) -> Self {
        let (tx, rx) = mpsc::channel::<Event<ScaledJob>>(16);
        let (resync_tx, resync_rx) = mpsc::channel::<ResyncNotification>(16);
        let informer = create_informer::<ScaledJob>("scaledjobs".to_string(), tx, resync_tx);
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
        tracing::info!("ScaledJob controller started");

        loop {
            select! {
                Some(event) = self.rx.recv() => {
                    match event {
                        Event::Add(sj) | Event::Update(_, sj) => {
                            if !watched(&sj.metadata) {
                                continue;
                            }
                            let name = sj.metadata.name;
                            self.in_queue.insert(name.to_owned());
                            self.work_queue.insert_at(name, std::time::Instant::now());
                        },
                        Event::Delete(sj) => {
                            if !watched(&sj.metadata) {
                                continue;
                            }
                            self.handle_delete(sj).await;
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
                        .get(&format!("/api/v1/scaledjobs/{}", name))
                        .map(|object| object.clone());
                    match object {
                        Some(object) => self.process(object).await,
                        None => {
                            tracing::debug!("ScaledJob {} no longer in store", name);
                        },
                    }
                },
                else => break
            }
        }

        let informer = std::mem::replace(&mut self.informer, None);
        informer.unwrap().await??;
        tracing::info!("ScaledJob controller exited");
        Ok(())
    }

    async fn process(&mut self, sj: ScaledJob) {
        let name = sj.metadata.name.to_owned();
        match self.reconcile(&sj).await {
            Ok(()) => {
                self.retries.remove(&name);
                self.enqueue(&name, std::time::Duration::from_secs(SYNC_PERIOD));
            },
            Err(e) => {
                tracing::error!("Error reconciling ScaledJob {}: {:#}", name, e);
                self.record_failure(&sj, &e).await;
                if e.is_config() {
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

    async fn reconcile(&self, sj: &ScaledJob) -> Result<(), ScalerError> {
        validate(sj)?;
        self.handler.upsert_scaled_job(sj.clone()).await?;

        let mut status = sj.status.to_owned().unwrap_or_default();
        let flipped = set_condition(
            &mut status.conditions,
            ConditionType::Ready,
            true,
            "ScaledJobReady",
            "scalers are built and the job scheduler is running",
            Local::now().naive_utc(),
        );
        if sj.status.as_ref() != Some(&status) {
            self.post_status(sj, status).await;
        }
        if flipped {
            self.api
                .post_event(sj.object_reference(), "ScaledJobReady", "ScaledJob is ready")
                .await;
        }
        Ok(())
    }

    async fn record_failure(&self, sj: &ScaledJob, error: &ScalerError) {
        let mut status = sj.status.to_owned().unwrap_or_default();
        let flipped = set_condition(
            &mut status.conditions,
            ConditionType::Ready,
            false,
            "ScaledJobCheckFailed",
            &error.to_string(),
            Local::now().naive_utc(),
        );
        self.post_status(sj, status).await;
        if flipped {
            self.api
                .post_event(sj.object_reference(), "ScaledJobCheckFailed", &error.to_string())
                .await;
        }
    }

    async fn post_status(
        &self,
        sj: &ScaledJob,
        status: resources::objects::scaled_job::ScaledJobStatus,
    ) {
        let mut sj = sj.clone();
        sj.status = Some(status);
        if let Err(e) = self.api.put_object(&KubeObject::ScaledJob(sj)).await {
            tracing::warn!("Failed to post ScaledJob status: {:#}", e);
        }
    }

    async fn handle_delete(&mut self, sj: ScaledJob) {
        let name = sj.metadata.name.to_owned();
        tracing::info!("ScaledJob {} deleted", name);
        self.handler
            .remove_target(&ScaleHandler::scaled_job_id(&sj))
            .await;
        self.retries.remove(&name);
    }

    async fn handle_resync(&mut self) {
        let objects: Vec<ScaledJob> = self
            .store
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut live = HashSet::new();
        for sj in &objects {
            if !watched(&sj.metadata) {
                continue;
            }
            live.insert(ScaleHandler::scaled_job_id(sj));
            let name = &sj.metadata.name;
            if !self.in_queue.contains(name) {
                self.in_queue.insert(name.to_owned());
                self.work_queue
                    .insert_at(name.to_owned(), std::time::Instant::now());
            }
        }

        for id in self.handler.active_target_ids().await {
            if id.starts_with("scaledjob/") && !live.contains(&id) {
                tracing::info!("Removing stale scaling target {}", id);
                self.handler.remove_target(&id).await;
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

fn validate(sj: &ScaledJob) -> Result<(), ScalerError> {
    if sj.spec.triggers.is_empty() {
        return Err(ScalerError::Config(
            "at least one trigger is required".to_string(),
        ));
    }
    if sj.spec.max_replica_count == 0 {
        return Err(ScalerError::config_param(
            "maxReplicaCount",
            "must be greater than zero",
        ));
    }
    if sj.spec.polling_interval == 0 {
        return Err(ScalerError::config_param(
            "pollingInterval",
            "must be greater than zero",
        ));
    }
    if let Some(percentage) = sj.spec.scaling_strategy.custom_scaling_running_job_percentage {
        if !(0.0..=1.0).contains(&percentage) {
            return Err(ScalerError::config_param(
                "customScalingRunningJobPercentage",
                "must be between 0 and 1",
            ));
        }
    }
    if sj.spec.job_target_ref.template.spec.containers.is_empty() {
        return Err(ScalerError::config_param(
            "jobTargetRef",
            "template must declare at least one container",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use resources::objects::{
        job::JobSpec,
        pod::{Container, PodSpec, PodTemplateSpec},
        scaled_job::{ScaledJobSpec, ScalingStrategy, ScalingStrategyName},
        trigger::Trigger,
        Metadata,
    };

    use super::*;

    fn scaled_job() -> ScaledJob {
        ScaledJob {
            metadata: Metadata {
                name: "batch".to_string(),
                ..Default::default()
            },
            spec: ScaledJobSpec {
                job_target_ref: JobSpec {
                    template: PodTemplateSpec {
                        metadata: Metadata::default(),
                        spec: PodSpec {
                            containers: vec![Container {
                                name: "worker".to_string(),
                                image: "worker:latest".to_string(),
                                env: Vec::new(),
                            }],
                        },
                    },
                    back_off_limit: 6,
                },
                max_replica_count: 5,
                polling_interval: 30,
                successful_jobs_history_limit: 100,
                failed_jobs_history_limit: 100,
                scaling_strategy: ScalingStrategy::default(),
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
    fn validate_accepts_sane_specs() {
        assert!(validate(&scaled_job()).is_ok());
    }

    #[test]
    fn validate_rejects_bad_specs() {
        let mut sj = scaled_job();
        sj.spec.triggers.clear();
        assert!(validate(&sj).unwrap_err().is_config());

        let mut sj = scaled_job();
        sj.spec.max_replica_count = 0;
        assert!(validate(&sj).unwrap_err().is_config());

        let mut sj = scaled_job();
        sj.spec.scaling_strategy = ScalingStrategy {
            name: ScalingStrategyName::Custom,
            custom_scaling_queue_length_deduction: None,
            custom_scaling_running_job_percentage: Some(1.5),
        };
        assert!(validate(&sj).unwrap_err().is_config());

        let mut sj = scaled_job();
        sj.spec.job_target_ref.template.spec.containers.clear();
        assert!(validate(&sj).unwrap_err().is_config());
    }

    #[test]
    fn history_limit_defaults_are_one_hundred() {
        let raw = r#"{
            "metadata": {"name": "batch"},
            "spec": {
                "jobTargetRef": {
                    "template": {
                        "metadata": {"name": ""},
                        "spec": {"containers": []}
                    }
                },
                "triggers": []
            }
        }"#;
        let sj: ScaledJob = serde_json::from_str(raw).unwrap();
        assert_eq!(sj.spec.successful_jobs_history_limit, 100);
        assert_eq!(sj.spec.failed_jobs_history_limit, 100);
        assert_eq!(sj.spec.max_replica_count, 100);
        assert_eq!(sj.spec.polling_interval, 30);
        assert_eq!(sj.spec.scaling_strategy.name, ScalingStrategyName::Default);
    }
}
