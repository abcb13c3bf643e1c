//! Name to queue mapping

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::attributes::QueueAttributes;
use crate::error::SqsError;
use crate::queue::{Queue, QueueId};

pub const MAX_QUEUE_NAME_LENGTH: usize = 80;

/// Owns every queue of one service instance. Names are case-sensitive.
#[derive(Debug)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<Queue>>,
    next_id: AtomicU64,
    defaults: QueueAttributes,
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new(QueueAttributes::default())
    }
}

impl QueueRegistry {
    /// `defaults` seeds the attributes of every newly created queue.
    pub fn new(defaults: QueueAttributes) -> Self {
        Self {
            queues: DashMap::new(),
            next_id: AtomicU64::new(1),
            defaults,
        }
    }

    pub fn defaults(&self) -> &QueueAttributes {
        &self.defaults
    }

    /// Create a queue, or return the existing one of the same name with its
    /// attributes untouched.
    pub fn create_queue(
        &self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<Arc<Queue>, SqsError> {
        validate_queue_name(name)?;

        if let Some(existing) = self.queues.get(name) {
            debug!(queue = %name, "Queue already exists, returning it unchanged");
            return Ok(Arc::clone(existing.value()));
        }

        // Validated before taking the entry lock: checking the target reads
        // another shard of the same map.
        let attributes = self.defaults.with_applied(attributes)?;
        self.check_redrive_target(name, &attributes)?;

        match self.queues.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                debug!(queue = %name, "Queue already exists, returning it unchanged");
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let id = QueueId(self.next_id.fetch_add(1, Ordering::Relaxed));
                let queue = Arc::new(Queue::new(id, name.to_string(), attributes));
                entry.insert(Arc::clone(&queue));
                info!(queue = %name, queue_id = %id, "Created queue");
                Ok(queue)
            }
        }
    }

    pub fn get_queue(&self, name: &str) -> Result<Arc<Queue>, SqsError> {
        self.queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))
    }

    /// Look up a queue without failing; used for redrive targets.
    pub fn find(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|q| Arc::clone(q.value()))
    }

    /// Sorted queue names, optionally filtered by prefix
    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .iter()
            .filter(|entry| prefix.map_or(true, |p| entry.key().starts_with(p)))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Remove a queue and discard its messages. Absent queues are ignored.
    pub fn delete_queue(&self, name: &str) -> bool {
        match self.queues.remove(name) {
            Some((_, queue)) => {
                queue.mark_deleted();
                info!(queue = %name, "Deleted queue");
                for source in self.sources_of(name) {
                    warn!(
                        queue = %source,
                        target = %name,
                        "Dead-letter target deleted, messages will keep redelivering"
                    );
                }
                true
            }
            None => {
                debug!(queue = %name, "Delete of unknown queue ignored");
                false
            }
        }
    }

    /// Apply `attributes` on top of a queue's current ones, atomically with
    /// respect to other updates of the same queue.
    pub fn set_queue_attributes(
        &self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), SqsError> {
        let queue = self.get_queue(name)?;
        // The target lookup reads the map, so it runs before the attribute
        // write lock is taken.
        let preview = queue.attributes().with_applied(attributes)?;
        self.check_redrive_target(name, &preview)?;
        queue.update_attributes(|current| current.with_applied(attributes))?;
        info!(queue = %name, "Updated queue attributes");
        Ok(())
    }

    /// Names of queues whose redrive policy targets `name`
    pub fn dead_letter_source_queues(&self, name: &str) -> Result<Vec<String>, SqsError> {
        self.get_queue(name)?;
        Ok(self.sources_of(name))
    }

    fn sources_of(&self, name: &str) -> Vec<String> {
        let mut sources: Vec<String> = self
            .queues
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .attributes()
                    .redrive_policy
                    .is_some_and(|rp| rp.dead_letter_target == name)
            })
            .map(|entry| entry.key().clone())
            .collect();
        sources.sort();
        sources
    }

    pub fn all(&self) -> Vec<Arc<Queue>> {
        self.queues.iter().map(|q| Arc::clone(q.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    fn check_redrive_target(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<(), SqsError> {
        let Some(policy) = &attributes.redrive_policy else {
            return Ok(());
        };
        if policy.dead_letter_target == name {
            return Err(SqsError::InvalidAttributeValue(
                "A queue cannot be its own dead-letter target".into(),
            ));
        }
        if !self.queues.contains_key(&policy.dead_letter_target) {
            return Err(SqsError::InvalidAttributeValue(format!(
                "Dead-letter target does not exist: {}",
                policy.dead_letter_target
            )));
        }
        Ok(())
    }
}

/// 1 to 80 characters of ASCII alphanumerics, hyphens and underscores.
pub fn validate_queue_name(name: &str) -> Result<(), SqsError> {
    if name.is_empty() {
        return Err(SqsError::MissingParameter("QueueName".into()));
    }
    if name.len() > MAX_QUEUE_NAME_LENGTH {
        return Err(SqsError::InvalidName(format!(
            "{name} is longer than {MAX_QUEUE_NAME_LENGTH} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SqsError::InvalidName(format!(
            "{name} may only contain alphanumerics, hyphens and underscores"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_attrs() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_queue_name_rules() {
        assert!(validate_queue_name("orders").is_ok());
        assert!(validate_queue_name("Orders-2_b").is_ok());
        assert!(validate_queue_name(&"q".repeat(80)).is_ok());

        assert!(matches!(
            validate_queue_name(""),
            Err(SqsError::MissingParameter(_))
        ));
        for bad in ["has space", "dot.ted", "slash/", "ümlaut", "star*"] {
            assert!(
                matches!(validate_queue_name(bad), Err(SqsError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(matches!(
            validate_queue_name(&"q".repeat(81)),
            Err(SqsError::InvalidName(_))
        ));
    }

    #[test]
    fn test_create_is_idempotent() {
        let registry = QueueRegistry::default();
        let first = registry.create_queue("orders", &no_attrs()).unwrap();
        let attrs = HashMap::from([("VisibilityTimeout".to_string(), "5".to_string())]);
        let second = registry.create_queue("orders", &attrs).unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.attributes().visibility_timeout, 30);
        assert_eq!(registry.list_queues(None), vec!["orders"]);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let registry = QueueRegistry::default();
        let lower = registry.create_queue("orders", &no_attrs()).unwrap();
        let upper = registry.create_queue("ORDERS", &no_attrs()).unwrap();
        assert_ne!(lower.id(), upper.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_defaults_seed_new_queues() {
        let registry = QueueRegistry::new(QueueAttributes {
            visibility_timeout: 5,
            ..QueueAttributes::default()
        });
        let q = registry.create_queue("q", &no_attrs()).unwrap();
        assert_eq!(q.attributes().visibility_timeout, 5);
    }

    #[test]
    fn test_invalid_attributes_create_nothing() {
        let registry = QueueRegistry::default();
        let attrs = HashMap::from([("VisibilityTimeout".to_string(), "99999".to_string())]);
        assert!(registry.create_queue("q", &attrs).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_with_prefix() {
        let registry = QueueRegistry::default();
        for name in ["beta", "alpha-1", "alpha-2"] {
            registry.create_queue(name, &no_attrs()).unwrap();
        }
        assert_eq!(registry.list_queues(Some("alpha")), vec!["alpha-1", "alpha-2"]);
        assert_eq!(registry.list_queues(None).len(), 3);
        assert!(registry.list_queues(Some("gamma")).is_empty());
    }

    #[test]
    fn test_get_and_delete() {
        let registry = QueueRegistry::default();
        let q = registry.create_queue("q", &no_attrs()).unwrap();
        assert_eq!(registry.get_queue("q").unwrap().id(), q.id());

        assert!(registry.delete_queue("q"));
        assert!(q.is_deleted());
        assert!(!registry.delete_queue("q"));
        assert!(matches!(
            registry.get_queue("q"),
            Err(SqsError::QueueNotFound(_))
        ));
    }

    #[test]
    fn test_redrive_target_must_exist_and_differ() {
        let registry = QueueRegistry::default();
        let policy = |target: &str| {
            HashMap::from([(
                "RedrivePolicy".to_string(),
                format!(r#"{{"maxReceiveCount":3,"deadLetterTarget":"{target}"}}"#),
            )])
        };

        assert!(matches!(
            registry.create_queue("src", &policy("missing")),
            Err(SqsError::InvalidAttributeValue(_))
        ));
        assert!(matches!(
            registry.create_queue("src", &policy("src")),
            Err(SqsError::InvalidAttributeValue(_))
        ));

        registry.create_queue("dlq", &no_attrs()).unwrap();
        registry.create_queue("src", &policy("dlq")).unwrap();
        assert_eq!(registry.dead_letter_source_queues("dlq").unwrap(), vec!["src"]);
    }

    #[test]
    fn test_set_attributes_updates_last_modified() {
        let registry = QueueRegistry::default();
        let q = registry.create_queue("q", &no_attrs()).unwrap();
        let attrs = HashMap::from([(
            "ReceiveMessageWaitTimeSeconds".to_string(),
            "20".to_string(),
        )]);
        registry.set_queue_attributes("q", &attrs).unwrap();
        assert_eq!(q.attributes().receive_message_wait_time_seconds, 20);
        assert!(q.last_modified_timestamp() >= q.created_timestamp());
    }

    #[test]
    fn test_concurrent_set_attributes_keeps_both_updates() {
        let registry = QueueRegistry::default();
        let visibility = HashMap::from([("VisibilityTimeout".to_string(), "5".to_string())]);
        let wait = HashMap::from([(
            "ReceiveMessageWaitTimeSeconds".to_string(),
            "7".to_string(),
        )]);

        for round in 0..500 {
            let name = format!("q{round}");
            let q = registry.create_queue(&name, &no_attrs()).unwrap();
            let barrier = std::sync::Barrier::new(2);

            std::thread::scope(|scope| {
                for update in [&visibility, &wait] {
                    let (registry, barrier, name) = (&registry, &barrier, &name);
                    scope.spawn(move || {
                        barrier.wait();
                        registry.set_queue_attributes(name, update).unwrap();
                    });
                }
            });

            let attributes = q.attributes();
            assert_eq!(attributes.visibility_timeout, 5, "round {round}");
            assert_eq!(
                attributes.receive_message_wait_time_seconds, 7,
                "round {round}"
            );
        }
    }

    #[test]
    fn test_deleting_target_orphans_sources() {
        let registry = QueueRegistry::default();
        registry.create_queue("dlq", &no_attrs()).unwrap();
        let policy = HashMap::from([(
            "RedrivePolicy".to_string(),
            r#"{"maxReceiveCount":2,"deadLetterTarget":"dlq"}"#.to_string(),
        )]);
        let source = registry.create_queue("work", &policy).unwrap();
        assert_eq!(registry.sources_of("dlq"), vec!["work"]);

        assert!(registry.delete_queue("dlq"));
        // The policy stays in place; only the target is gone.
        assert!(source.attributes().redrive_policy.is_some());
        assert_eq!(registry.sources_of("dlq"), vec!["work"]);
        assert!(registry.dead_letter_source_queues("dlq").is_err());
    }

    #[test]
    fn test_failed_update_leaves_attributes_untouched() {
        let registry = QueueRegistry::default();
        let q = registry.create_queue("q", &no_attrs()).unwrap();
        let before = q.attributes();

        let attrs = HashMap::from([
            ("VisibilityTimeout".to_string(), "10".to_string()),
            ("MaximumMessageSize".to_string(), "1".to_string()),
        ]);
        assert!(registry.set_queue_attributes("q", &attrs).is_err());
        assert_eq!(q.attributes(), before);
    }
}
