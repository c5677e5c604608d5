use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::job::{Blueprint, BoxedJob, FieldMap};
use crate::queue::QueueError;

struct Registered<S> {
    prototype: BoxedJob<S>,
    blueprint: Blueprint,
}

/// Maps job tags to reconstruction prototypes.
///
/// The blueprint for each tag is captured exactly once, at registration;
/// registering the same tag again is a no-op.
pub(crate) struct Registry<S> {
    entries: RwLock<HashMap<String, Registered<S>>>,
}

impl<S: Send + Sync + 'static> Registry<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store a prototype under the job's tag. Returns `false` when the tag
    /// is already registered, leaving the original blueprint untouched.
    pub(crate) fn register(&self, job: BoxedJob<S>) -> bool {
        let tag = job.tag().to_string();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&tag) {
            return false;
        }

        let blueprint = Blueprint {
            job_name: tag.clone(),
            fields: job.schema(),
        };
        debug!(tag = %tag, "job type registered");
        entries.insert(
            tag,
            Registered {
                prototype: job,
                blueprint,
            },
        );
        true
    }

    /// Rebuild a job of the given tag from untyped field data.
    pub(crate) fn rebuild(&self, tag: &str, fields: &FieldMap) -> Result<BoxedJob<S>, QueueError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let registered = entries
            .get(tag)
            .ok_or_else(|| QueueError::UnknownTag(tag.to_string()))?;
        registered
            .prototype
            .rebuild(fields)
            .map_err(|source| QueueError::Rebuild {
                tag: tag.to_string(),
                source,
            })
    }

    pub(crate) fn blueprints(&self) -> Vec<Blueprint> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut blueprints: Vec<Blueprint> =
            entries.values().map(|r| r.blueprint.clone()).collect();
        blueprints.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        blueprints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FieldSpec, Job, JobError};
    use async_trait::async_trait;

    struct Beacon {
        note: String,
    }

    #[async_trait]
    impl Job<()> for Beacon {
        fn tag(&self) -> &str {
            "beacon"
        }

        fn schema(&self) -> Vec<FieldSpec> {
            vec![FieldSpec::new("note", "string")]
        }

        async fn process(&self, _service: &()) -> Result<(), JobError> {
            if self.note.is_empty() {
                return Err(JobError::Failed("empty note".to_string()));
            }
            Ok(())
        }

        fn rebuild(&self, fields: &FieldMap) -> Result<BoxedJob<()>, JobError> {
            let note = fields
                .get("note")
                .and_then(|value| value.as_str())
                .ok_or_else(|| JobError::MissingField("note".to_string()))?
                .to_string();
            Ok(Box::new(Beacon { note }))
        }
    }

    fn beacon() -> BoxedJob<()> {
        Box::new(Beacon {
            note: "prototype".to_string(),
        })
    }

    #[test]
    fn duplicate_registration_keeps_one_blueprint() {
        let registry = Registry::new();
        assert!(registry.register(beacon()));
        assert!(!registry.register(beacon()));

        let blueprints = registry.blueprints();
        assert_eq!(blueprints.len(), 1);
        assert_eq!(blueprints[0].job_name, "beacon");
        assert_eq!(blueprints[0].fields, vec![FieldSpec::new("note", "string")]);
    }

    #[test]
    fn rebuild_unknown_tag_errors() {
        let registry: Registry<()> = Registry::new();
        let err = registry.rebuild("ghost", &FieldMap::new()).err().unwrap();
        assert!(matches!(err, QueueError::UnknownTag(tag) if tag == "ghost"));
    }

    #[test]
    fn rebuild_surfaces_field_errors() {
        let registry = Registry::new();
        registry.register(beacon());

        let err = registry.rebuild("beacon", &FieldMap::new()).err().unwrap();
        assert!(matches!(err, QueueError::Rebuild { .. }));
    }

    #[test]
    fn rebuild_produces_a_working_job() {
        let registry = Registry::new();
        registry.register(beacon());

        let mut fields = FieldMap::new();
        fields.insert("note".to_string(), serde_json::json!("from the outside"));
        let job = registry.rebuild("beacon", &fields).unwrap();
        assert_eq!(job.tag(), "beacon");
    }
}
