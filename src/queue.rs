use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Options;
use crate::dispatcher::Dispatcher;
use crate::job::{Blueprint, BoxedJob, Envelope, FieldMap, Job, JobError, JobId};
use crate::metrics::{Collector, JobStatus, JobUpdate, Stats};
use crate::registry::Registry;
use crate::telemetry::MonitorClient;
use crate::worker::{idle_pool, Worker, WorkerId};

/// Buffer between event emitters and the metrics collector.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("no job registered for tag: {0}")]
    UnknownTag(String),

    #[error("could not rebuild job {tag}: {source}")]
    Rebuild {
        tag: String,
        #[source]
        source: JobError,
    },

    #[error("queue is closed")]
    Closed,
}

/// In-process job queue backed by a fixed pool of workers.
///
/// Jobs are admitted in FIFO order through a bounded channel; admission
/// suspends the caller once the channel is full. Failed jobs are requeued at
/// the tail until their retry budget runs out. Every transition feeds the
/// metrics collector, whose counters are readable at any time via
/// [`Queue::stats`] and optionally streamed to a monitor sink.
pub struct Queue<S> {
    id: String,
    app: String,
    verbose: bool,
    admission: mpsc::Sender<Envelope<S>>,
    events: mpsc::Sender<JobUpdate>,
    stats: Arc<RwLock<Stats>>,
    registry: Registry<S>,
    shutdown: CancellationToken,
    dispatcher: Option<JoinHandle<mpsc::Receiver<WorkerId>>>,
    collector: Option<JoinHandle<()>>,
    workers: Vec<Option<JoinHandle<()>>>,
}

impl<S: Send + Sync + 'static> Queue<S> {
    /// Create a queue and start its workers, dispatcher and metrics
    /// collector. Must be called from within a tokio runtime.
    ///
    /// `service` carries the application dependencies handed to every job's
    /// `process` call.
    pub fn new(options: Options, service: S) -> Self {
        let worker_count = options.resolved_workers();
        let capacity = options.resolved_capacity();
        let id = Uuid::new_v4().to_string();
        let app = options
            .tag
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let service = Arc::new(service);
        let shutdown = CancellationToken::new();
        let (admission_tx, admission_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (idle_tx, idle_rx) = idle_pool(worker_count);

        let worker_ids: Vec<WorkerId> = (0..worker_count).map(WorkerId).collect();
        let stats = Arc::new(RwLock::new(Stats::new(
            id.clone(),
            app.clone(),
            worker_ids,
        )));

        let mut delivery = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (delivery_tx, delivery_rx) = mpsc::channel(1);
            delivery.push(delivery_tx);

            let worker = Worker::new(
                WorkerId(index),
                Arc::clone(&service),
                delivery_rx,
                idle_tx.clone(),
                admission_tx.clone(),
                events_tx.clone(),
            );
            workers.push(Some(tokio::spawn(worker.run(shutdown.clone()))));
        }
        drop(idle_tx);

        let dispatcher = Dispatcher::new(admission_rx, idle_rx, delivery);
        let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown.clone()));

        let monitor = MonitorClient::new(options.monitor_addr.clone(), app.clone(), id.clone());
        let collector = Collector::new(events_rx, Arc::clone(&stats), monitor);
        let collector_handle = tokio::spawn(collector.run(shutdown.clone()));

        if options.verbose {
            info!(queue_id = %id, app = %app, "queue started");
        }
        info!(count = worker_count, "workers started");

        Self {
            id,
            app,
            verbose: options.verbose,
            admission: admission_tx,
            events: events_tx,
            stats,
            registry: Registry::new(),
            shutdown,
            dispatcher: Some(dispatcher_handle),
            collector: Some(collector_handle),
            workers,
        }
    }

    /// Queue a job for processing, returning its id.
    ///
    /// Suspends while the admission channel is at capacity; this is the
    /// queue's backpressure boundary. `retry` is the number of requeue
    /// attempts granted beyond the first run. Must not be called once
    /// [`Queue::close`] has begun.
    pub async fn later(&self, job: impl Job<S> + 'static, retry: u32) -> Result<JobId, QueueError> {
        self.admit(Box::new(job), retry).await
    }

    async fn admit(&self, job: BoxedJob<S>, retry: u32) -> Result<JobId, QueueError> {
        let id = JobId::new();
        let tag = job.tag().to_string();
        let envelope = Envelope {
            id: id.clone(),
            job,
            enqueued_at: Utc::now(),
            retry,
            requeued: 0,
        };

        self.admission
            .send(envelope)
            .await
            .map_err(|_| QueueError::Closed)?;
        info!(job_id = %id, tag = %tag, "job queued");

        let update = JobUpdate {
            id: id.clone(),
            tag,
            status: JobStatus::Queued,
            worker: None,
        };
        if self.events.send(update).await.is_err() {
            warn!(job_id = %id, "metrics collector unavailable");
        }

        Ok(id)
    }

    /// Register a job prototype so [`Queue::create_job`] can rebuild it from
    /// untyped field data. Registering an already-known tag is a no-op.
    pub fn register(&self, job: impl Job<S> + 'static) {
        self.registry.register(Box::new(job));
    }

    /// Rebuild a registered job type from a field map and queue it.
    ///
    /// Fails with [`QueueError::UnknownTag`] before any admission or metrics
    /// side effect when the tag was never registered.
    pub async fn create_job(
        &self,
        tag: &str,
        fields: &FieldMap,
        retry: u32,
    ) -> Result<JobId, QueueError> {
        let job = self.registry.rebuild(tag, fields)?;
        self.admit(job, retry).await
    }

    /// Point-in-time copy of the queue's health counters.
    pub fn stats(&self) -> Stats {
        self.stats.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Schemas captured for every registered job type.
    pub fn blueprints(&self) -> Vec<Blueprint> {
        self.registry.blueprints()
    }

    /// This queue's generated identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The name reported in stats and to the monitor.
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Stop the queue: admissions end, the dispatcher is stopped and
    /// awaited, every currently idle worker is drained, and the metrics
    /// collector shuts down along with its monitor connection.
    ///
    /// Workers busy inside `process` are not interrupted; they finish their
    /// current job and exit on their own. A worker that never returns from
    /// `process` is never reclaimed.
    pub async fn close(&mut self) {
        self.shutdown.cancel();

        if let Some(handle) = self.dispatcher.take() {
            match handle.await {
                Ok(mut idle) => {
                    while let Ok(worker) = idle.try_recv() {
                        if let Some(join) = self.workers.get_mut(worker.0).and_then(Option::take) {
                            let _ = join.await;
                        }
                    }
                }
                Err(err) => warn!(error = %err, "dispatcher task failed"),
            }
        }

        if let Some(handle) = self.collector.take() {
            let _ = handle.await;
        }

        if self.verbose {
            info!(queue_id = %self.id, "queue stopped");
        }
    }

    /// Block until Ctrl-C, then close the queue.
    pub async fn wait_for_shutdown(&mut self) {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "could not install Ctrl-C handler");
        }
        self.close().await;
    }
}
