use futures::StreamExt;
use resources::objects::{
    job::{Job, JobPhase},
    object_reference::ObjectReference,
    scaled_job::{ScaledJob, ScalingStrategy, ScalingStrategyName},
    Metadata,
};
use uuid::Uuid;

use crate::platform::ApiClient;

/// Upper bound on concurrent history deletions per tick.
const CLEANUP_CONCURRENCY: usize = 8;

/// Jobs owned by one ScaledJob, split the way the scheduler needs them.
#[derive(Debug, Default)]
pub struct OwnedJobs {
    /// Jobs not yet in a terminal phase, pending ones included.
    pub non_terminal: u32,
    /// Jobs still in the Pending phase.
    pub pending: u32,
    pub succeeded: Vec<Job>,
    pub failed: Vec<Job>,
}

pub fn partition_owned(jobs: Vec<Job>, owner: &ObjectReference) -> OwnedJobs {
    let mut owned = OwnedJobs::default();
    for job in jobs {
        if !job.metadata.owner_references.contains(owner) {
            continue;
        }
        match job.phase() {
            JobPhase::Pending => {
                owned.pending += 1;
                owned.non_terminal += 1;
            },
            JobPhase::Running => owned.non_terminal += 1,
            JobPhase::Succeeded => owned.succeeded.push(job),
            JobPhase::Failed => owned.failed.push(job),
        }
    }
    owned
}

/// How many Jobs to create this tick.
///
/// All strategies are bounded by `effectiveMax = max(0, ceiling - running)`:
/// - default:  `queueLength`
/// - custom:   `floor(queueLength × percentage) − deduction`, floored at 0
/// - accurate: `queueLength − pendingJobs`, floored at 0
pub fn compute_desired_jobs(
    strategy: &ScalingStrategy,
    queue_length: u64,
    max_replica_count: u32,
    running: u32,
    pending: u32,
) -> u32 {
    let effective_max = max_replica_count.saturating_sub(running) as u64;
    let desired = match strategy.name {
        ScalingStrategyName::Default => queue_length,
        ScalingStrategyName::Custom => {
            let percentage = strategy.custom_scaling_running_job_percentage.unwrap_or(1.0);
            let deduction = strategy.custom_scaling_queue_length_deduction.unwrap_or(0) as u64;
            ((queue_length as f64 * percentage).floor() as u64).saturating_sub(deduction)
        },
        ScalingStrategyName::Accurate => queue_length.saturating_sub(pending as u64),
    };
    desired.min(effective_max) as u32
}

/// Names of the completed jobs past `limit`, oldest completion first.
pub fn select_history_victims(mut jobs: Vec<Job>, limit: u32) -> Vec<String> {
    if jobs.len() <= limit as usize {
        return Vec::new();
    }
    jobs.sort_by_key(|job| {
        job.status
            .as_ref()
            .and_then(|s| s.completion_time.or(s.start_time))
    });
    let excess = jobs.len() - limit as usize;
    jobs.into_iter()
        .take(excess)
        .map(|job| job.metadata.name)
        .collect()
}

/// Stamp one Job from the ScaledJob's template, uniquely named and
/// owned by the ScaledJob.
pub fn job_from_template(sj: &ScaledJob) -> Job {
    let suffix = Uuid::new_v4().to_simple().to_string();
    let mut metadata = Metadata {
        name: format!("{}-{}", sj.metadata.name, &suffix[..8]),
        namespace: sj.metadata.namespace.to_owned(),
        labels: sj.spec.job_target_ref.template.metadata.labels.clone(),
        ..Default::default()
    };
    metadata.owner_references.push(sj.object_reference());
    Job {
        metadata,
        spec: sj.spec.job_target_ref.clone(),
        status: None,
    }
}

/// Fire-and-forget creation of `desired` Jobs. Creation failures are
/// logged and not retried within the tick.
pub async fn create_jobs(api: &ApiClient, sj: &ScaledJob, desired: u32) {
    for _ in 0..desired {
        let job = job_from_template(sj);
        let name = job.metadata.name.to_owned();
        if let Err(e) = api.create_job(job).await {
            tracing::warn!("Failed to create job {}: {:#}", name, e);
        }
    }
}

/// Delete completed jobs past the history limits, oldest first,
/// with bounded concurrency.
pub async fn cleanup_history(api: &ApiClient, sj: &ScaledJob, owned: OwnedJobs) {
    let mut victims = select_history_victims(owned.succeeded, sj.spec.successful_jobs_history_limit);
    victims.extend(select_history_victims(
        owned.failed,
        sj.spec.failed_jobs_history_limit,
    ));
    if victims.is_empty() {
        return;
    }
    tracing::info!(
        "Cleaning up {} completed jobs of scaledjob {}",
        victims.len(),
        sj.metadata.name
    );
    futures::stream::iter(victims)
        .for_each_concurrent(CLEANUP_CONCURRENCY, |name| {
            let api = api.clone();
            async move {
                if let Err(e) = api.delete_job(&name).await {
                    tracing::warn!("Failed to delete job {}: {:#}", name, e);
                }
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use resources::objects::{
        job::JobStatus,
        pod::{PodSpec, PodTemplateSpec},
    };

    use super::*;

    fn strategy(name: ScalingStrategyName) -> ScalingStrategy {
        ScalingStrategy {
            name,
            custom_scaling_queue_length_deduction: None,
            custom_scaling_running_job_percentage: None,
        }
    }

    fn terminal_job(name: &str, owner: &ObjectReference, phase: JobPhase, done_at: i64) -> Job {
        let mut metadata = Metadata {
            name: name.to_string(),
            ..Default::default()
        };
        metadata.owner_references.push(owner.clone());
        Job {
            metadata,
            spec: resources::objects::job::JobSpec {
                template: PodTemplateSpec {
                    metadata: Metadata::default(),
                    spec: PodSpec {
                        containers: Vec::new(),
                    },
                },
                back_off_limit: 6,
            },
            status: Some(JobStatus {
                phase,
                start_time: Some(NaiveDateTime::from_timestamp(done_at - 10, 0)),
                completion_time: Some(NaiveDateTime::from_timestamp(done_at, 0)),
            }),
        }
    }

    #[test]
    fn default_strategy_is_queue_bounded_by_ceiling() {
        let s = strategy(ScalingStrategyName::Default);
        assert_eq!(compute_desired_jobs(&s, 3, 10, 0, 0), 3);
        assert_eq!(compute_desired_jobs(&s, 30, 10, 4, 0), 6);
        // Running jobs above the ceiling never go negative
        assert_eq!(compute_desired_jobs(&s, 30, 10, 12, 0), 0);
        assert_eq!(compute_desired_jobs(&s, 0, 10, 0, 0), 0);
    }

    #[test]
    fn accurate_strategy_subtracts_pending() {
        let s = strategy(ScalingStrategyName::Accurate);
        // queueLength=8, running=2, pending=3 -> min(8-3, 5-2) = 3
        assert_eq!(compute_desired_jobs(&s, 8, 5, 2, 3), 3);
        // More pending than queued floors at 0
        assert_eq!(compute_desired_jobs(&s, 2, 5, 0, 4), 0);
    }

    #[test]
    fn custom_strategy_applies_percentage_then_deduction() {
        let s = ScalingStrategy {
            name: ScalingStrategyName::Custom,
            custom_scaling_queue_length_deduction: Some(1),
            custom_scaling_running_job_percentage: Some(0.5),
        };
        // floor(9 * 0.5) - 1 = 3
        assert_eq!(compute_desired_jobs(&s, 9, 10, 0, 0), 3);
        // Deduction past zero floors at 0
        let s = ScalingStrategy {
            name: ScalingStrategyName::Custom,
            custom_scaling_queue_length_deduction: Some(10),
            custom_scaling_running_job_percentage: Some(0.5),
        };
        assert_eq!(compute_desired_jobs(&s, 9, 10, 0, 0), 0);
        // Defaults behave like the default strategy
        let s = strategy(ScalingStrategyName::Custom);
        assert_eq!(compute_desired_jobs(&s, 7, 10, 0, 0), 7);
    }

    #[test]
    fn history_victims_are_oldest_past_limit() {
        let owner = ObjectReference {
            kind: "ScaledJob".to_string(),
            name: "batch".to_string(),
        };
        let jobs = vec![
            terminal_job("b", &owner, JobPhase::Succeeded, 200),
            terminal_job("a", &owner, JobPhase::Succeeded, 100),
            terminal_job("c", &owner, JobPhase::Succeeded, 300),
        ];
        // limit 2 keeps the two most recent completions
        assert_eq!(select_history_victims(jobs.clone(), 2), vec!["a"]);
        assert!(select_history_victims(jobs, 3).is_empty());
    }

    #[test]
    fn partition_counts_by_phase_and_owner() {
        let owner = ObjectReference {
            kind: "ScaledJob".to_string(),
            name: "batch".to_string(),
        };
        let stranger = ObjectReference {
            kind: "ScaledJob".to_string(),
            name: "other".to_string(),
        };
        let mut pending = terminal_job("p", &owner, JobPhase::Pending, 0);
        pending.status = Some(JobStatus {
            phase: JobPhase::Pending,
            start_time: None,
            completion_time: None,
        });
        let jobs = vec![
            pending,
            terminal_job("r", &owner, JobPhase::Running, 0),
            terminal_job("s", &owner, JobPhase::Succeeded, 100),
            terminal_job("f", &owner, JobPhase::Failed, 100),
            terminal_job("foreign", &stranger, JobPhase::Running, 0),
        ];
        let owned = partition_owned(jobs, &owner);
        assert_eq!(owned.non_terminal, 2);
        assert_eq!(owned.pending, 1);
        assert_eq!(owned.succeeded.len(), 1);
        assert_eq!(owned.failed.len(), 1);
    }
}
