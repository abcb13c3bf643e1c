//! Dead-letter redrive
//!
//! A message that has already been delivered `maxReceiveCount` times is not
//! delivered again. Instead, the receive that would have exceeded the limit
//! moves it into the dead-letter queue's store under a fresh id.

use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::{debug, info};

use crate::message::MessageId;
use crate::queue::{Queue, QueueState};
use crate::registry::QueueRegistry;

/// Where over-delivered messages of a queue should go
#[derive(Debug, Clone)]
pub struct RedriveTarget {
    pub max_receive_count: u32,
    pub queue: Arc<Queue>,
}

pub struct RedriveCoordinator<'a> {
    registry: &'a QueueRegistry,
}

impl<'a> RedriveCoordinator<'a> {
    pub fn new(registry: &'a QueueRegistry) -> Self {
        Self { registry }
    }

    /// Resolve the live dead-letter queue for `source`. A policy pointing at
    /// a deleted queue resolves to nothing, so the source keeps redelivering.
    pub fn resolve_target(&self, source: &Queue) -> Option<RedriveTarget> {
        let policy = source.attributes().redrive_policy?;
        match self.registry.find(&policy.dead_letter_target) {
            Some(queue) if !queue.is_deleted() && queue.id() != source.id() => {
                Some(RedriveTarget {
                    max_receive_count: policy.max_receive_count,
                    queue,
                })
            }
            _ => {
                debug!(
                    queue = %source.name(),
                    target = %policy.dead_letter_target,
                    "Dead-letter target missing, redrive skipped"
                );
                None
            }
        }
    }

    /// Move an available message from `source` to `target`. Both queues are
    /// locked in id order. Returns the message's id in the target queue, or
    /// `None` if the message was taken by someone else first.
    pub fn divert(&self, source: &Queue, target: &Queue, id: MessageId) -> Option<MessageId> {
        if source.id() == target.id() {
            return None;
        }

        let moved = {
            let (mut src, mut dst) = lock_pair(source, target);
            if target.is_deleted() || !src.store.get(id)?.is_available() {
                return None;
            }
            let message = src.store.remove(id)?;
            let receive_count = message.receive_count;
            let sent = dst.store.enqueue(message.redriven());
            info!(
                queue = %source.name(),
                target = %target.name(),
                message_id = %id,
                new_message_id = %sent.message_id,
                receive_count,
                "Moved message to dead-letter queue"
            );
            sent.message_id
        };

        target.notify_waiters();
        Some(moved)
    }
}

/// Lock two distinct queues in ascending id order; returns (source, target).
fn lock_pair<'q>(
    source: &'q Queue,
    target: &'q Queue,
) -> (MutexGuard<'q, QueueState>, MutexGuard<'q, QueueState>) {
    if source.id() < target.id() {
        let src = source.lock();
        let dst = target.lock();
        (src, dst)
    } else {
        let dst = target.lock();
        let src = source.lock();
        (src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::Instant;

    fn registry_with_dlq() -> (QueueRegistry, Arc<Queue>, Arc<Queue>) {
        let registry = QueueRegistry::default();
        let dlq = registry.create_queue("dlq", &HashMap::new()).unwrap();
        let attrs = HashMap::from([(
            "RedrivePolicy".to_string(),
            r#"{"maxReceiveCount":2,"deadLetterTarget":"dlq"}"#.to_string(),
        )]);
        let src = registry.create_queue("src", &attrs).unwrap();
        (registry, src, dlq)
    }

    #[tokio::test]
    async fn test_resolve_target() {
        let (registry, src, dlq) = registry_with_dlq();
        let coordinator = RedriveCoordinator::new(&registry);
        let target = coordinator.resolve_target(&src).unwrap();
        assert_eq!(target.max_receive_count, 2);
        assert_eq!(target.queue.id(), dlq.id());
        assert!(coordinator.resolve_target(&dlq).is_none());

        registry.delete_queue("dlq");
        assert!(coordinator.resolve_target(&src).is_none());
    }

    #[tokio::test]
    async fn test_divert_moves_with_fresh_identity() {
        let (registry, src, dlq) = registry_with_dlq();
        let sent = src.send("poison".into(), vec![]).unwrap();
        src.lock()
            .deliver(sent.message_id, Instant::now(), Duration::ZERO)
            .unwrap();
        src.release_expired();

        let coordinator = RedriveCoordinator::new(&registry);
        let new_id = coordinator.divert(&src, &dlq, sent.message_id).unwrap();
        assert_ne!(new_id, sent.message_id);

        assert_eq!(src.approximate_counts(), (0, 0));
        let moved = dlq.snapshot_available();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].id, new_id);
        assert_eq!(moved[0].body, "poison");
        assert_eq!(moved[0].receive_count, 0);
    }

    #[tokio::test]
    async fn test_divert_skips_in_flight_message() {
        let (registry, src, dlq) = registry_with_dlq();
        let sent = src.send("busy".into(), vec![]).unwrap();
        src.lock()
            .deliver(sent.message_id, Instant::now(), Duration::from_secs(30))
            .unwrap();

        let coordinator = RedriveCoordinator::new(&registry);
        assert!(coordinator.divert(&src, &dlq, sent.message_id).is_none());
        assert_eq!(src.approximate_counts(), (0, 1));
        assert_eq!(dlq.approximate_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_divert_works_in_either_lock_order() {
        let registry = QueueRegistry::default();
        // Source created first, so it has the lower id
        let src = registry.create_queue("src", &HashMap::new()).unwrap();
        let dlq = registry.create_queue("dlq", &HashMap::new()).unwrap();
        let sent = src.send("x".into(), vec![]).unwrap();

        let coordinator = RedriveCoordinator::new(&registry);
        assert!(coordinator.divert(&src, &dlq, sent.message_id).is_some());
        let back = dlq.snapshot_available()[0].id;
        assert!(coordinator.divert(&dlq, &src, back).is_some());
        assert_eq!(src.approximate_counts(), (1, 0));
    }
}
