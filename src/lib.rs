mod config;
mod dispatcher;
mod job;
mod metrics;
pub mod monitor;
mod queue;
mod registry;
mod telemetry;
mod worker;

pub use config::{Options, DEFAULT_CAPACITY, DEFAULT_WORKERS};
pub use job::{Blueprint, BoxedJob, FieldMap, FieldSpec, Job, JobError, JobId};
pub use metrics::{JobStatus, JobUpdate, Stats};
pub use queue::{Queue, QueueError};
pub use worker::WorkerId;
