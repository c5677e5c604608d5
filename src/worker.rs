use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::Envelope;
use crate::metrics::{JobStatus, JobUpdate};

/// Stable worker identity: an index into the queue's delivery arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel pair tracking which workers are free. Capacity equals the worker
/// count, so rejoining never blocks and membership never exceeds the pool.
pub(crate) fn idle_pool(count: usize) -> (mpsc::Sender<WorkerId>, mpsc::Receiver<WorkerId>) {
    mpsc::channel(count)
}

/// Execution unit owning at most one envelope at a time.
///
/// Delivery arrives on a private single-slot channel, so the dispatcher can
/// never hand a worker a second job before the first is disposed of.
pub(crate) struct Worker<S> {
    id: WorkerId,
    service: Arc<S>,
    delivery: mpsc::Receiver<Envelope<S>>,
    idle: mpsc::Sender<WorkerId>,
    requeue: mpsc::Sender<Envelope<S>>,
    events: mpsc::Sender<JobUpdate>,
}

impl<S: Send + Sync + 'static> Worker<S> {
    pub(crate) fn new(
        id: WorkerId,
        service: Arc<S>,
        delivery: mpsc::Receiver<Envelope<S>>,
        idle: mpsc::Sender<WorkerId>,
        requeue: mpsc::Sender<Envelope<S>>,
        events: mpsc::Sender<JobUpdate>,
    ) -> Self {
        Self {
            id,
            service,
            delivery,
            idle,
            requeue,
            events,
        }
    }

    /// Run until shutdown. The quit signal is only honored between jobs; an
    /// envelope is never abandoned mid-flight.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        debug!(worker = self.id.0, "worker started");
        if self.idle.send(self.id).await.is_err() {
            return;
        }

        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivered = self.delivery.recv() => match delivered {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.handle(envelope).await;
        }

        debug!(worker = self.id.0, "worker stopped");
    }

    async fn handle(&mut self, mut envelope: Envelope<S>) {
        let tag = envelope.job.tag().to_string();
        self.emit(&envelope, &tag, JobStatus::Started).await;
        info!(job_id = %envelope.id, worker = self.id.0, tag = %tag, "job started");

        match envelope.job.process(self.service.as_ref()).await {
            Ok(()) => {
                self.emit(&envelope, &tag, JobStatus::Processed).await;
                let latency = Utc::now().signed_duration_since(envelope.enqueued_at);
                info!(
                    job_id = %envelope.id,
                    worker = self.id.0,
                    latency_ms = latency.num_milliseconds(),
                    "job processed"
                );
            }
            Err(err) => {
                self.emit(&envelope, &tag, JobStatus::Failed).await;
                warn!(job_id = %envelope.id, worker = self.id.0, error = %err, "job failed");

                if envelope.requeued < envelope.retry {
                    envelope.requeued += 1;
                    self.emit(&envelope, &tag, JobStatus::Requeued).await;
                    info!(job_id = %envelope.id, attempt = envelope.requeued, "job requeued");

                    // Rejoin before the re-send: a full admission channel
                    // must not park the only worker able to drain it.
                    let _ = self.idle.send(self.id).await;
                    if self.requeue.send(envelope).await.is_err() {
                        warn!("requeue dropped, queue is closing");
                    }
                    return;
                }
            }
        }

        let _ = self.idle.send(self.id).await;
    }

    async fn emit(&self, envelope: &Envelope<S>, tag: &str, status: JobStatus) {
        let update = JobUpdate {
            id: envelope.id.clone(),
            tag: tag.to_string(),
            status,
            worker: Some(self.id),
        };
        let _ = self.events.send(update).await;
    }
}
