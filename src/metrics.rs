use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::job::JobId;
use crate::telemetry::MonitorClient;
use crate::worker::WorkerId;

/// How often the full stats snapshot is pushed to a configured monitor.
const STATS_PUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle transitions a job reports while moving through the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Processed,
    Failed,
    Deferred,
    Requeued,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Processed => "processed",
            JobStatus::Failed => "failed",
            JobStatus::Deferred => "deferred",
            JobStatus::Requeued => "requeued",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One job transition, as emitted by the queue and its workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdate {
    pub id: JobId,
    pub tag: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,
}

/// Aggregate health counters for one queue.
///
/// Written only by the metrics collector; readers always get a detached copy
/// via [`Queue::stats`](crate::Queue::stats).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub queue_id: String,
    pub app: String,
    pub workers: Vec<WorkerId>,
    pub active_jobs: u64,
    pub queued_jobs: u64,
    pub processed_jobs: u64,
    pub failed_jobs: u64,
    pub deferred_jobs: u64,
    pub requeued_jobs: u64,
    pub created_at: DateTime<Utc>,
}

impl Stats {
    pub(crate) fn new(queue_id: String, app: String, workers: Vec<WorkerId>) -> Self {
        Self {
            queue_id,
            app,
            workers,
            active_jobs: 0,
            queued_jobs: 0,
            processed_jobs: 0,
            failed_jobs: 0,
            deferred_jobs: 0,
            requeued_jobs: 0,
            created_at: Utc::now(),
        }
    }
}

/// Apply one transition to the counters. A job leaves the active count on
/// every settling transition, clamped so a stray event can never drive it
/// negative.
fn apply(stats: &mut Stats, update: &JobUpdate) {
    match update.status {
        JobStatus::Queued => stats.queued_jobs += 1,
        JobStatus::Started => stats.active_jobs += 1,
        JobStatus::Processed => {
            drop_active(stats);
            stats.processed_jobs += 1;
        }
        JobStatus::Failed => {
            drop_active(stats);
            stats.failed_jobs += 1;
        }
        JobStatus::Deferred => {
            drop_active(stats);
            stats.deferred_jobs += 1;
        }
        JobStatus::Requeued => {
            drop_active(stats);
            stats.requeued_jobs += 1;
        }
    }
}

fn drop_active(stats: &mut Stats) {
    if stats.active_jobs > 0 {
        stats.active_jobs -= 1;
    }
}

/// Single consumer of the job-event stream. Owns the published snapshot and
/// the monitor connection, so no other task ever writes either.
pub(crate) struct Collector {
    events: mpsc::Receiver<JobUpdate>,
    stats: Arc<RwLock<Stats>>,
    monitor: MonitorClient,
}

impl Collector {
    pub(crate) fn new(
        events: mpsc::Receiver<JobUpdate>,
        stats: Arc<RwLock<Stats>>,
        monitor: MonitorClient,
    ) -> Self {
        Self {
            events,
            stats,
            monitor,
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        let mut push_timer = interval(STATS_PUSH_INTERVAL);
        push_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                update = self.events.recv() => {
                    let Some(update) = update else { break };
                    self.record(update).await;
                }
                _ = push_timer.tick() => {
                    let snapshot = self.snapshot();
                    self.monitor.push_stats(&snapshot).await;
                }
            }
        }

        // events emitted before the quit signal still count
        while let Ok(update) = self.events.try_recv() {
            self.record(update).await;
        }
        self.monitor.shutdown().await;
        debug!("metrics collector stopped");
    }

    async fn record(&mut self, update: JobUpdate) {
        {
            let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
            apply(&mut stats, &update);
        }
        self.monitor.push_update(&update).await;
    }

    fn snapshot(&self) -> Stats {
        self.stats.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(status: JobStatus) -> JobUpdate {
        JobUpdate {
            id: JobId::new(),
            tag: "sample".to_string(),
            status,
            worker: Some(WorkerId(0)),
        }
    }

    fn empty_stats() -> Stats {
        Stats::new("q".to_string(), "app".to_string(), vec![WorkerId(0)])
    }

    #[test]
    fn successful_run_counts_once_per_transition() {
        let mut stats = empty_stats();
        apply(&mut stats, &update(JobStatus::Queued));
        apply(&mut stats, &update(JobStatus::Started));
        assert_eq!(stats.active_jobs, 1);
        apply(&mut stats, &update(JobStatus::Processed));

        assert_eq!(stats.queued_jobs, 1);
        assert_eq!(stats.processed_jobs, 1);
        assert_eq!(stats.failed_jobs, 0);
        assert_eq!(stats.active_jobs, 0);
    }

    #[test]
    fn failed_then_requeued_clamps_active_at_zero() {
        let mut stats = empty_stats();
        apply(&mut stats, &update(JobStatus::Queued));
        apply(&mut stats, &update(JobStatus::Started));
        apply(&mut stats, &update(JobStatus::Failed));
        // the requeue transition settles an already-settled job
        apply(&mut stats, &update(JobStatus::Requeued));

        assert_eq!(stats.active_jobs, 0);
        assert_eq!(stats.failed_jobs, 1);
        assert_eq!(stats.requeued_jobs, 1);
    }

    #[test]
    fn deferred_jobs_settle_like_failures() {
        let mut stats = empty_stats();
        apply(&mut stats, &update(JobStatus::Started));
        apply(&mut stats, &update(JobStatus::Deferred));

        assert_eq!(stats.active_jobs, 0);
        assert_eq!(stats.deferred_jobs, 1);
        assert_eq!(stats.processed_jobs, 0);
    }
}
