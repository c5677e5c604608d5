use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::job::Envelope;
use crate::worker::WorkerId;

/// Matches queued envelopes with idle workers, in admission order.
///
/// Runs as a single task so dispatch order is exactly admission order; a
/// requeued envelope re-enters at the tail and competes like any new job.
/// On shutdown the idle-pool receiver is handed back so the queue can drain
/// the workers that were never busy.
pub(crate) struct Dispatcher<S> {
    admission: mpsc::Receiver<Envelope<S>>,
    idle: mpsc::Receiver<WorkerId>,
    delivery: Vec<mpsc::Sender<Envelope<S>>>,
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    pub(crate) fn new(
        admission: mpsc::Receiver<Envelope<S>>,
        idle: mpsc::Receiver<WorkerId>,
        delivery: Vec<mpsc::Sender<Envelope<S>>>,
    ) -> Self {
        Self {
            admission,
            idle,
            delivery,
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) -> mpsc::Receiver<WorkerId> {
        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                admitted = self.admission.recv() => match admitted {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let next_idle = tokio::select! {
                _ = shutdown.cancelled() => None,
                next = self.idle.recv() => next,
            };
            let Some(worker) = next_idle else {
                debug!(job_id = %envelope.id, "undispatched envelope dropped at shutdown");
                break;
            };

            if self.delivery[worker.0].send(envelope).await.is_err() {
                warn!(worker = worker.0, "worker delivery slot closed");
            }
        }

        debug!("dispatcher stopped");
        self.idle
    }
}
