use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a queued job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Untyped name→value mapping used to rebuild jobs from external sources
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// Error raised while executing or rebuilding a job
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("field {field} is not a {expected}")]
    FieldType { field: String, expected: &'static str },

    #[error("{0}")]
    Failed(String),
}

/// One entry of a job's field layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub type_name: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Descriptive schema captured for a registered job type, in declaration
/// order, for external consumers that build jobs from untyped data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub job_name: String,
    pub fields: Vec<FieldSpec>,
}

/// A unit of work the queue can execute.
///
/// `S` is the application service type handed to every job; implementors
/// close over their own payload fields and pull shared dependencies from it.
#[async_trait]
pub trait Job<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// Stable, non-empty identifier for this job's concrete type.
    fn tag(&self) -> &str;

    /// Ordered field layout advertised to external job builders.
    fn schema(&self) -> Vec<FieldSpec>;

    /// Execute the unit of work. A job may run more than once when it is
    /// requeued after a failure; idempotence is the implementor's contract.
    async fn process(&self, service: &S) -> Result<(), JobError>;

    /// Build a fresh instance of this job type from untyped field data.
    fn rebuild(&self, fields: &FieldMap) -> Result<BoxedJob<S>, JobError>;
}

pub type BoxedJob<S> = Box<dyn Job<S>>;

/// A job travelling through the queue, wrapped with identity and retry
/// bookkeeping. `requeued` never exceeds `retry`.
pub struct Envelope<S> {
    pub id: JobId,
    pub job: BoxedJob<S>,
    pub enqueued_at: DateTime<Utc>,
    pub retry: u32,
    pub requeued: u32,
}
