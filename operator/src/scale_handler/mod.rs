use std::{
    collections::HashMap,
    sync::{atomic::AtomicU32, Arc},
    time::Duration,
};

use chrono::{Duration as ChronoDuration, Local};
use futures::future::join_all;
use rand::Rng;
use resources::objects::{
    condition::{set_condition, ConditionType},
    object_reference::ObjectReference,
    pod::{EnvVar, PodTemplateSpec},
    scaled_job::ScaledJob,
    scaled_object::{Fallback, ScaledObject},
    trigger::Trigger,
    KubeObject,
};
use tokio::{
    sync::{watch, Mutex, RwLock},
    task::JoinHandle,
    time,
};

use crate::{
    auth::{AuthResolver, ResolvedAuth},
    error::ScalerError,
    platform::ApiClient,
    scaler::{build_scaler, FailedScaler, MetricSample, MetricSpec, ScalerContext},
};

pub mod cache;
pub mod jobs;
pub mod registry;

use cache::{ActivityState, ScalerCache, ScalerEntry};
use registry::MetricNameRegistry;

/// Hard ceiling on a single scaler poll, whatever the polling interval.
const MAX_POLL_DEADLINE: Duration = Duration::from_secs(30);
/// Deadline for answering an external metric query.
const SERVE_DEADLINE: Duration = Duration::from_secs(5);

/// The runtime core: owns one poll loop per scaling target, the scaler
/// caches, and the metric name registry the external metrics endpoint
/// reads through.
pub struct ScaleHandler {
    targets: RwLock<HashMap<String, ActiveTarget>>,
    registry: MetricNameRegistry,
    api: ApiClient,
    resolver: AuthResolver,
    /// Serializes every cache build, swap and removal. The metric name
    /// registry relies on there being a single writer at a time.
    build_lock: Mutex<()>,
    shutdown_rx: watch::Receiver<bool>,
}

struct ActiveTarget {
    data: Arc<TargetData>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One trigger's build plan: the resolved context, or the resolution
/// failure a placeholder scaler will keep reporting for it.
struct TriggerPlan {
    ctx: ScalerContext,
    failure: Option<ScalerError>,
}

/// Immutable snapshot a poll loop works from. Spec changes produce a new
/// snapshot and a new loop; nothing here is mutated in place.
pub struct TargetData {
    pub id: String,
    pub workload: Workload,
    pub cache: Arc<ScalerCache>,
}

pub enum Workload {
    Object(Box<ScaledObject>),
    Job(Box<ScaledJob>),
}

impl TargetData {
    fn polling_interval(&self) -> u32 {
        match &self.workload {
            Workload::Object(so) => so.spec.polling_interval,
            Workload::Job(sj) => sj.spec.polling_interval,
        }
    }

    fn fallback(&self) -> Option<&Fallback> {
        match &self.workload {
            Workload::Object(so) => so.spec.fallback.as_ref(),
            Workload::Job(_) => None,
        }
    }

    fn object_reference(&self) -> ObjectReference {
        match &self.workload {
            Workload::Object(so) => so.object_reference(),
            Workload::Job(sj) => sj.object_reference(),
        }
    }
}

impl ScaleHandler {
    pub fn new(api: ApiClient, shutdown_rx: watch::Receiver<bool>) -> Arc<Self> {
        Arc::new(Self {
            targets: RwLock::new(HashMap::new()),
            registry: MetricNameRegistry::new(),
            resolver: AuthResolver::new(api.clone()),
            api,
            build_lock: Mutex::new(()),
            shutdown_rx,
        })
    }

    pub fn scaled_object_id(so: &ScaledObject) -> String {
        format!("scaledobject/{}/{}", so.metadata.namespace, so.metadata.name)
    }

    pub fn scaled_job_id(sj: &ScaledJob) -> String {
        format!("scaledjob/{}/{}", sj.metadata.namespace, sj.metadata.name)
    }

    /// Admit or refresh a ScaledObject. Scalers are rebuilt only when a
    /// trigger fingerprint changed; the poll loop restarts either way so
    /// it picks up the new spec. Returns the metric specs for the HPA.
    pub async fn upsert_scaled_object(&self, so: ScaledObject) -> Result<Vec<MetricSpec>, ScalerError> {
        let _guard = self.build_lock.lock().await;
        let id = Self::scaled_object_id(&so);

        let rs = self
            .api
            .get_replica_set(&so.spec.scale_target_ref.name)
            .await
            .map_err(|e| {
                ScalerError::Platform(format!(
                    "scale target {}: {:#}",
                    so.spec.scale_target_ref.name, e
                ))
            })?;
        let env = container_env(&rs.spec.template);
        let contexts = self
            .resolve_contexts(
                &so.spec.triggers,
                &so.metadata.namespace,
                &so.metadata.name,
                &env,
            )
            .await?;

        let data = TargetData {
            id: id.to_owned(),
            workload: Workload::Object(Box::new(so)),
            cache: Arc::new(ScalerCache {
                entries: Vec::new(),
            }),
        };
        let specs = self.swap_target(data, contexts, true).await?;
        Ok(specs)
    }

    /// Admit or refresh a ScaledJob. Same lifecycle as ScaledObject,
    /// but no metric names are registered: the job scheduler consumes
    /// its own samples instead of serving an HPA.
    pub async fn upsert_scaled_job(&self, sj: ScaledJob) -> Result<(), ScalerError> {
        let _guard = self.build_lock.lock().await;
        let id = Self::scaled_job_id(&sj);

        let env = container_env(&sj.spec.job_target_ref.template);
        let contexts = self
            .resolve_contexts(
                &sj.spec.triggers,
                &sj.metadata.namespace,
                &sj.metadata.name,
                &env,
            )
            .await?;

        let data = TargetData {
            id,
            workload: Workload::Job(Box::new(sj)),
            cache: Arc::new(ScalerCache {
                entries: Vec::new(),
            }),
        };
        self.swap_target(data, contexts, false).await?;
        Ok(())
    }

    /// Stop a target's loop, close its scalers exactly once, and drop its
    /// metric names. Returns whether the target existed.
    pub async fn remove_target(&self, id: &str) -> bool {
        let _guard = self.build_lock.lock().await;
        self.remove_target_locked(id).await
    }

    pub async fn active_target_ids(&self) -> Vec<String> {
        self.targets.read().await.keys().cloned().collect()
    }

    /// Global shutdown: stop every loop, then close every scaler.
    pub async fn shutdown(&self) {
        let _guard = self.build_lock.lock().await;
        let ids: Vec<String> = self.targets.read().await.keys().cloned().collect();
        for id in ids {
            self.remove_target_locked(&id).await;
        }
    }

    /// Answer an external metric query from the HPA. Routes to the owning
    /// target's scaler, with the fallback replica count substituted when
    /// the scaler has tripped its failure threshold.
    pub async fn serve_metric(&self, metric_name: &str) -> Result<MetricSample, ScalerError> {
        let route = self.registry.lookup(metric_name).ok_or_else(|| {
            ScalerError::Config(format!("unknown metric {}", metric_name))
        })?;
        let data = {
            let targets = self.targets.read().await;
            targets.get(&route.target_id).map(|t| t.data.clone())
        }
        .ok_or_else(|| {
            ScalerError::Internal(format!(
                "metric {} routed to missing target {}",
                metric_name, route.target_id
            ))
        })?;
        let entry = data
            .cache
            .entries
            .get(route.scaler_index)
            .cloned()
            .ok_or_else(|| ScalerError::Internal("metric route index out of range".to_string()))?;

        let failure = match time::timeout(
            SERVE_DEADLINE,
            entry.scaler.get_metrics_and_activity(metric_name),
        )
        .await
        {
            Ok(Ok(metrics)) => {
                let sample = metrics
                    .samples
                    .iter()
                    .find(|s| s.name == metric_name)
                    .or_else(|| metrics.samples.first())
                    .cloned();
                return sample.ok_or_else(|| {
                    ScalerError::Internal(format!(
                        "{} scaler returned no samples",
                        entry.trigger_type
                    ))
                });
            },
            Ok(Err(e)) => e,
            Err(_) => ScalerError::Source("query deadline exceeded".to_string()),
        };

        if let Some(fallback) = data.fallback() {
            if entry.failures() >= fallback.failure_threshold {
                let target = entry
                    .specs
                    .iter()
                    .find(|s| s.name == metric_name)
                    .map(|s| s.target_value())
                    .unwrap_or(1);
                // A value of replicas x target drives the HPA to exactly
                // the configured fallback replica count
                return Ok(MetricSample {
                    name: metric_name.to_string(),
                    value: (fallback.replicas as u64 * target) as f64,
                });
            }
        }
        Err(ScalerError::Source(format!(
            "target {} scaler {} failed: {}",
            route.target_id, entry.trigger_type, failure
        )))
    }

    /// Build-or-reuse the cache for `data` and restart its poll loop.
    /// Callers hold the build lock.
    async fn swap_target(
        &self,
        mut data: TargetData,
        plans: Vec<TriggerPlan>,
        register_metrics: bool,
    ) -> Result<Vec<MetricSpec>, ScalerError> {
        let fingerprints: Vec<String> = plans.iter().map(|plan| plan.ctx.fingerprint()).collect();
        let id = data.id.to_owned();

        let reuse = {
            let targets = self.targets.read().await;
            targets
                .get(&id)
                .map_or(false, |t| t.data.cache.fingerprints() == fingerprints)
        };

        let fresh_cache = if reuse {
            None
        } else {
            // Every constructor must succeed before anything is swapped
            Some(Arc::new(build_cache(plans)?))
        };

        if register_metrics {
            if let Some(cache) = &fresh_cache {
                // Publish the new routes first: a name collision leaves the
                // running target untouched
                if let Err(e) = self.registry.replace_target(&id, &cache.routes()) {
                    cache.close_all().await;
                    return Err(e);
                }
            }
        }

        let old = self.take_target(&id).await;
        data.cache = match (fresh_cache, &old) {
            (Some(fresh), _) => {
                if let Some(old) = &old {
                    old.cache.close_all().await;
                }
                fresh
            },
            (None, Some(old)) => old.cache.clone(),
            (None, None) => {
                return Err(ScalerError::Internal(
                    "cache marked reusable but target is gone".to_string(),
                ))
            },
        };

        let specs = data.cache.metric_specs();
        let target = self.spawn_loop(Arc::new(data));
        self.targets.write().await.insert(id, target);
        Ok(specs)
    }

    /// Resolve auth for every trigger. A resolution failure is per
    /// trigger and never fatal to the target: the offending trigger gets
    /// a failure plan (its scaler reports failed, not active, counting
    /// against the fallback policy) and the rest resolve normally.
    async fn resolve_contexts(
        &self,
        triggers: &[Trigger],
        namespace: &str,
        owner_name: &str,
        env: &[EnvVar],
    ) -> Result<Vec<TriggerPlan>, ScalerError> {
        if triggers.is_empty() {
            return Err(ScalerError::Config(
                "at least one trigger is required".to_string(),
            ));
        }
        let mut plans = Vec::with_capacity(triggers.len());
        for (index, trigger) in triggers.iter().enumerate() {
            let (auth, failure) = match self.resolve_trigger_auth(trigger, env).await {
                Ok(auth) => (auth, None),
                Err(e) => {
                    tracing::warn!(
                        "Auth resolution for trigger {} ({}) of {} failed: {}",
                        index,
                        trigger.type_,
                        owner_name,
                        e
                    );
                    (ResolvedAuth::empty(), Some(e))
                },
            };
            plans.push(TriggerPlan {
                ctx: ScalerContext {
                    trigger_index: index,
                    trigger_type: trigger.type_.to_owned(),
                    metadata: trigger.metadata.clone(),
                    auth,
                    metric_type: trigger.metric_type.unwrap_or_default(),
                    namespace: namespace.to_string(),
                    owner_name: owner_name.to_string(),
                },
                failure,
            });
        }
        Ok(plans)
    }

    async fn resolve_trigger_auth(
        &self,
        trigger: &Trigger,
        env: &[EnvVar],
    ) -> Result<ResolvedAuth, ScalerError> {
        let auth_record = match &trigger.authentication_ref {
            Some(auth_ref) => Some(
                self.api
                    .get_trigger_authentication(&auth_ref.name)
                    .await
                    .map_err(|e| {
                        ScalerError::Auth(format!(
                            "triggerauthentication {}: {:#}",
                            auth_ref.name, e
                        ))
                    })?,
            ),
            None => None,
        };
        self.resolver
            .resolve(
                &trigger.metadata,
                auth_record.as_ref().map(|record| &record.spec),
                env,
            )
            .await
    }

    async fn remove_target_locked(&self, id: &str) -> bool {
        match self.take_target(id).await {
            Some(data) => {
                data.cache.close_all().await;
                self.registry.remove_target(id);
                true
            },
            None => false,
        }
    }

    /// Stop a target's poll loop and wait for it to exit.
    async fn take_target(&self, id: &str) -> Option<Arc<TargetData>> {
        let target = self.targets.write().await.remove(id)?;
        let _ = target.stop_tx.send(true);
        if let Err(e) = target.handle.await {
            tracing::warn!("Poll loop for {} ended abnormally: {:#}", id, e);
        }
        Some(target.data)
    }

    fn spawn_loop(&self, data: Arc<TargetData>) -> ActiveTarget {
        let (stop_tx, stop_rx) = watch::channel(false);
        let api = self.api.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let loop_data = data.clone();
        let handle =
            tokio::spawn(
                async move { run_target_loop(loop_data, api, stop_rx, shutdown_rx).await },
            );
        ActiveTarget {
            data,
            stop_tx,
            handle,
        }
    }
}

fn build_cache(plans: Vec<TriggerPlan>) -> Result<ScalerCache, ScalerError> {
    let mut entries = Vec::with_capacity(plans.len());
    for plan in plans {
        let trigger_type = plan.ctx.trigger_type.to_owned();
        let fingerprint = plan.ctx.fingerprint();
        let scaler = match plan.failure {
            // Unresolved credentials get a stand-in that keeps failing
            Some(error) => FailedScaler::build(&plan.ctx, &error),
            None => build_scaler(plan.ctx)?,
        };
        let specs = scaler.get_metric_spec_for_scaling();
        entries.push(Arc::new(ScalerEntry {
            trigger_type,
            fingerprint,
            specs,
            scaler,
            consecutive_failures: AtomicU32::new(0),
        }));
    }
    Ok(ScalerCache {
        entries,
    })
}

fn container_env(template: &PodTemplateSpec) -> Vec<EnvVar> {
    template
        .spec
        .containers
        .iter()
        .flat_map(|container| container.env.iter().cloned())
        .collect()
}

/// Tick period jittered by up to 10 percent either way, so many targets
/// on the same interval do not stampede their sources.
fn jittered_interval(secs: u32) -> Duration {
    let base = secs.max(1) as f64;
    let factor: f64 = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_secs_f64(base * factor)
}

fn poll_deadline(interval_secs: u32) -> Duration {
    MAX_POLL_DEADLINE.min(Duration::from_secs(interval_secs.max(1) as u64))
}

async fn run_target_loop(
    data: Arc<TargetData>,
    api: ApiClient,
    mut stop_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::info!(
        "Started {} scaler(s) for {}",
        data.cache.entries.len(),
        data.id
    );
    api.post_event(
        data.object_reference(),
        "KEDAScalersStarted",
        &format!("Started scalers watching {}", data.id),
    )
    .await;

    let mut state = ActivityState::new(Local::now().naive_utc());
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = shutdown_rx.changed() => break,
            _ = time::sleep(jittered_interval(data.polling_interval())) => {
                match &data.workload {
                    Workload::Object(so) => tick_scaled_object(&api, &data, so, &mut state).await,
                    Workload::Job(sj) => tick_scaled_job(&api, &data, sj).await,
                }
            },
        }
    }

    api.post_event(
        data.object_reference(),
        "KEDAScalersStopped",
        &format!("Stopped scalers watching {}", data.id),
    )
    .await;
    tracing::info!("Stopped scalers for {}", data.id);
}

/// One ScaledObject tick: poll all scalers, derive activity, and manage
/// the zero boundary. The HPA owns the `current > 0` range through the
/// metrics endpoint; this loop only ever crosses zero.
async fn tick_scaled_object(
    api: &ApiClient,
    data: &TargetData,
    so: &ScaledObject,
    state: &mut ActivityState,
) {
    let now = Local::now().naive_utc();
    let deadline = poll_deadline(so.spec.polling_interval);

    let polls = join_all(data.cache.entries.iter().map(|entry| async move {
        match time::timeout(
            deadline,
            entry.scaler.get_metrics_and_activity(entry.primary_metric()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ScalerError::Source("poll deadline exceeded".to_string())),
        }
    }))
    .await;

    let mut is_active = false;
    let mut fallback_tripped = false;
    for (entry, result) in data.cache.entries.iter().zip(polls) {
        match result {
            Ok(metrics) => {
                entry.record_success();
                is_active |= metrics.is_active;
                for sample in metrics.samples {
                    tracing::debug!("{}: {} = {}", data.id, sample.name, sample.value);
                    state.last_samples.insert(sample.name, sample.value);
                }
            },
            Err(e) => {
                let failures = entry.record_failure();
                tracing::warn!(
                    "Scaler {} for {} failed ({} consecutive): {:#}",
                    entry.trigger_type,
                    data.id,
                    failures,
                    e
                );
                // A failed scaler reads as not active; once past the
                // threshold its metric serves the fallback value instead
                if let Some(fallback) = &so.spec.fallback {
                    if failures >= fallback.failure_threshold {
                        fallback_tripped = true;
                    }
                }
            },
        }
    }

    let previously_active = state.active;
    let previously_fallback = state.fallback_active;
    state.last_poll = Some(now);
    state.active = is_active;
    state.fallback_active = fallback_tripped;
    if is_active {
        state.last_active_time = now;
    }

    if let Err(e) = reconcile_zero_boundary(api, so, state, now).await {
        // Platform hiccup: skip this tick, the next one retries
        tracing::warn!("Zero boundary reconcile for {} failed: {:#}", data.id, e);
    }

    if is_active != previously_active || fallback_tripped != previously_fallback || is_active {
        update_scaled_object_status(api, so, state).await;
    }
}

/// What the loop should do at the zero boundary this tick.
#[derive(Debug, PartialEq, Eq)]
enum ZeroBoundaryAction {
    Keep,
    /// Set replicas directly, bypassing the HPA.
    Scale(u32),
}

fn zero_boundary_action(
    so: &ScaledObject,
    active: bool,
    current: u32,
    idle_for: ChronoDuration,
) -> ZeroBoundaryAction {
    let rest = so
        .spec
        .idle_replica_count
        .unwrap_or(so.spec.min_replica_count);
    if rest > 0 {
        // This target never rests at zero; the HPA owns the whole range
        return ZeroBoundaryAction::Keep;
    }
    if active && current == 0 {
        // Lift out of zero without waiting for the HPA, which cannot see
        // a workload with no replicas
        return ZeroBoundaryAction::Scale(so.spec.min_replica_count.max(1));
    }
    if !active
        && current > 0
        && idle_for > ChronoDuration::seconds(so.spec.cooldown_period as i64)
    {
        return ZeroBoundaryAction::Scale(0);
    }
    ZeroBoundaryAction::Keep
}

async fn reconcile_zero_boundary(
    api: &ApiClient,
    so: &ScaledObject,
    state: &ActivityState,
    now: chrono::NaiveDateTime,
) -> anyhow::Result<()> {
    if so
        .spec
        .idle_replica_count
        .unwrap_or(so.spec.min_replica_count)
        > 0
    {
        return Ok(());
    }
    let rs = api.get_replica_set(&so.spec.scale_target_ref.name).await?;
    let current = rs.spec.replicas;
    let idle_for = now - state.last_active_time;
    match zero_boundary_action(so, state.active, current, idle_for) {
        ZeroBoundaryAction::Keep => Ok(()),
        ZeroBoundaryAction::Scale(replicas) => api.scale_replica_set(rs, replicas).await,
    }
}

/// Patch the Active and Fallback conditions onto the live object.
/// The object is re-fetched so the reconciler's status fields
/// (Ready, metric names) are never clobbered by a stale snapshot.
async fn update_scaled_object_status(api: &ApiClient, so: &ScaledObject, state: &ActivityState) {
    let now = Local::now().naive_utc();
    let mut so = match api.get_scaled_object(&so.metadata.name).await {
        Ok(fresh) => fresh,
        Err(e) => {
            tracing::warn!(
                "Failed to fetch scaledobject {} for status update: {:#}",
                so.metadata.name,
                e
            );
            return;
        },
    };
    tracing::debug!(
        "{} polled at {:?}, samples: {:?}",
        so.metadata.name,
        state.last_poll,
        state.last_samples
    );
    let mut status = so.status.take().unwrap_or_default();
    let (reason, message) = if state.active {
        ("ScalerActive", "at least one trigger is above its activation threshold")
    } else {
        ("ScalerNotActive", "no trigger is above its activation threshold")
    };
    set_condition(
        &mut status.conditions,
        ConditionType::Active,
        state.active,
        reason,
        message,
        now,
    );
    let (reason, message) = if state.fallback_active {
        ("FallbackExists", "at least one scaler tripped its failure threshold")
    } else {
        ("NoFallbackFound", "all scalers are healthy")
    };
    set_condition(
        &mut status.conditions,
        ConditionType::Fallback,
        state.fallback_active,
        reason,
        message,
        now,
    );
    status.last_active_time = Some(state.last_active_time);
    so.status = Some(status);
    if let Err(e) = api.put_object(&KubeObject::ScaledObject(so)).await {
        tracing::warn!("Failed to update scaledobject status: {:#}", e);
    }
}

/// One ScaledJob tick: sum the queue depth across scalers, create the
/// number of Jobs the scaling strategy asks for, and prune history.
async fn tick_scaled_job(api: &ApiClient, data: &TargetData, sj: &ScaledJob) {
    let deadline = poll_deadline(sj.spec.polling_interval);

    let mut queue_length = 0u64;
    for entry in &data.cache.entries {
        match time::timeout(
            deadline,
            entry.scaler.get_metrics_and_activity(entry.primary_metric()),
        )
        .await
        {
            Ok(Ok(metrics)) => {
                entry.record_success();
                if let Some(sample) = metrics.samples.first() {
                    queue_length += sample.value.max(0.0).floor() as u64;
                }
            },
            Ok(Err(e)) => {
                let failures = entry.record_failure();
                tracing::warn!(
                    "Scaler {} for {} failed ({} consecutive): {:#}",
                    entry.trigger_type,
                    data.id,
                    failures,
                    e
                );
            },
            Err(_) => {
                let failures = entry.record_failure();
                tracing::warn!(
                    "Scaler {} for {} exceeded the poll deadline ({} consecutive)",
                    entry.trigger_type,
                    data.id,
                    failures
                );
            },
        }
    }

    let jobs = match api.list_jobs().await {
        Ok(jobs) => jobs,
        Err(e) => {
            // Without the owned job counts no safe decision can be made
            tracing::warn!("Failed to list jobs for {}: {:#}", data.id, e);
            return;
        },
    };
    let owned = jobs::partition_owned(jobs, &sj.object_reference());
    let desired = jobs::compute_desired_jobs(
        &sj.spec.scaling_strategy,
        queue_length,
        sj.spec.max_replica_count,
        owned.non_terminal,
        owned.pending,
    );
    if desired > 0 {
        tracing::info!(
            "Creating {} job(s) for {} (queue length {}, {} running)",
            desired,
            data.id,
            queue_length,
            owned.non_terminal
        );
        jobs::create_jobs(api, sj, desired).await;
    }
    jobs::cleanup_history(api, sj, owned).await;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use resources::objects::{
        object_reference::ObjectReference,
        scaled_object::{Advanced, ScaledObjectSpec},
        trigger::Trigger,
        Metadata,
    };

    use super::*;
    use crate::scaler::test_context;

    fn scaled_object(min: u32, idle: Option<u32>, cooldown: u32) -> ScaledObject {
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
                max_replica_count: 10,
                polling_interval: 30,
                cooldown_period: cooldown,
                idle_replica_count: idle,
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
    fn active_target_at_zero_is_lifted_immediately() {
        let so = scaled_object(0, None, 300);
        assert_eq!(
            zero_boundary_action(&so, true, 0, ChronoDuration::zero()),
            ZeroBoundaryAction::Scale(1)
        );
        // An activated idle target lifts to its floor, not to 1
        let so = scaled_object(3, Some(0), 300);
        assert_eq!(
            zero_boundary_action(&so, true, 0, ChronoDuration::zero()),
            ZeroBoundaryAction::Scale(3)
        );
    }

    #[test]
    fn inactive_target_drops_to_zero_only_after_cooldown() {
        let so = scaled_object(0, None, 30);
        assert_eq!(
            zero_boundary_action(&so, false, 1, ChronoDuration::seconds(10)),
            ZeroBoundaryAction::Keep
        );
        assert_eq!(
            zero_boundary_action(&so, false, 1, ChronoDuration::seconds(31)),
            ZeroBoundaryAction::Scale(0)
        );
        // Already at zero: nothing to do
        assert_eq!(
            zero_boundary_action(&so, false, 0, ChronoDuration::seconds(31)),
            ZeroBoundaryAction::Keep
        );
    }

    #[test]
    fn nonzero_floor_leaves_the_range_to_the_hpa() {
        let so = scaled_object(2, None, 30);
        assert_eq!(
            zero_boundary_action(&so, false, 2, ChronoDuration::seconds(600)),
            ZeroBoundaryAction::Keep
        );
        assert_eq!(
            zero_boundary_action(&so, true, 2, ChronoDuration::zero()),
            ZeroBoundaryAction::Keep
        );
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        for _ in 0..100 {
            let d = jittered_interval(30);
            assert!(d >= Duration::from_secs_f64(27.0));
            assert!(d <= Duration::from_secs_f64(33.0));
        }
    }

    #[test]
    fn poll_deadline_is_capped_at_thirty_seconds() {
        assert_eq!(poll_deadline(10), Duration::from_secs(10));
        assert_eq!(poll_deadline(120), Duration::from_secs(30));
        assert_eq!(poll_deadline(0), Duration::from_secs(1));
    }

    fn plan(ctx: ScalerContext, failure: Option<ScalerError>) -> TriggerPlan {
        TriggerPlan {
            ctx,
            failure,
        }
    }

    #[test]
    fn build_cache_rejects_any_invalid_constructor() {
        let good = test_context(
            "rabbitmq",
            &[("host", "http://rabbit:15672"), ("queueName", "orders")],
        );
        let bad = test_context("rabbitmq", &[("queueName", "orders")]);
        let err = build_cache(vec![plan(good, None), plan(bad, None)]).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn failed_resolution_yields_a_placeholder_not_an_abort() {
        let good = test_context(
            "rabbitmq",
            &[("host", "http://rabbit:15672"), ("queueName", "orders")],
        );
        let unresolved = test_context(
            "rabbitmq",
            &[("host", "http://rabbit:15672"), ("queueName", "invoices")],
        );
        let cache = build_cache(vec![
            plan(good, None),
            plan(
                unresolved,
                Some(ScalerError::Auth("secret orders-auth not found".to_string())),
            ),
        ])
        .unwrap();
        assert_eq!(cache.entries.len(), 2);

        // The placeholder keeps reporting the stored failure, so the
        // trigger reads not-active and the fallback counter advances
        let err = cache.entries[1]
            .scaler
            .get_metrics_and_activity(cache.entries[1].primary_metric())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("secret orders-auth not found"));
        assert_eq!(
            cache.entries[1].primary_metric(),
            "s0-rabbitmq-unresolved-default-worker"
        );
        assert!(cache.entries[0]
            .scaler
            .get_metric_spec_for_scaling()[0]
            .name
            .contains("orders"));
    }
}
