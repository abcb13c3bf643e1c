//! A single queue: attributes plus its lock-protected store and scheduler

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::attributes::QueueAttributes;
use crate::error::SqsError;
use crate::message::{Message, MessageAttributeValue, MessageId, ReceiptHandle, SentMessage};
use crate::store::MessageStore;
use crate::visibility::VisibilityScheduler;

/// Registry-unique queue identity; also the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub(crate) u64);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// State guarded by a queue's mutex. Never held across an `.await`.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) store: MessageStore,
    pub(crate) scheduler: VisibilityScheduler,
}

impl QueueState {
    /// Requeue every message whose visibility deadline has passed.
    pub(crate) fn release_expired(&mut self, now: Instant) -> usize {
        let expired = self.scheduler.pop_expired(now);
        expired
            .into_iter()
            .filter(|id| self.store.requeue(*id))
            .count()
    }

    /// Deliver an available message with deadline `now + visibility`.
    pub(crate) fn deliver(
        &mut self,
        id: MessageId,
        now: Instant,
        visibility: Duration,
    ) -> Option<ReceiptHandle> {
        let deadline = now + visibility;
        let handle = self.store.mark_delivered(id, deadline)?;
        self.scheduler.schedule(id, deadline);
        Some(handle)
    }

    pub(crate) fn acknowledge(&mut self, handle: &ReceiptHandle) -> bool {
        match self.store.acknowledge(handle) {
            Some(Message {
                id,
                delivery: crate::message::Delivery::InFlight { deadline, .. },
                ..
            }) => {
                self.scheduler.cancel(id, deadline);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub(crate) fn purge(&mut self) -> usize {
        self.scheduler.clear();
        self.store.purge()
    }
}

pub struct Queue {
    id: QueueId,
    name: String,
    created_timestamp: i64,
    last_modified_timestamp: AtomicI64,
    attributes: RwLock<QueueAttributes>,
    state: Mutex<QueueState>,
    notify: Notify,
    deleted: AtomicBool,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("attributes", &*self.attributes.read())
            .finish_non_exhaustive()
    }
}

impl Queue {
    pub(crate) fn new(id: QueueId, name: String, attributes: QueueAttributes) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            name,
            created_timestamp: now,
            last_modified_timestamp: AtomicI64::new(now),
            attributes: RwLock::new(attributes),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Epoch seconds
    pub fn created_timestamp(&self) -> i64 {
        self.created_timestamp
    }

    /// Epoch seconds
    pub fn last_modified_timestamp(&self) -> i64 {
        self.last_modified_timestamp.load(Ordering::Relaxed)
    }

    pub fn attributes(&self) -> QueueAttributes {
        self.attributes.read().clone()
    }

    /// Derive new attributes from the current ones under the write lock, so
    /// concurrent updates of different keys are never lost. Nothing changes
    /// if `update` fails.
    pub(crate) fn update_attributes<F>(&self, update: F) -> Result<(), SqsError>
    where
        F: FnOnce(&QueueAttributes) -> Result<QueueAttributes, SqsError>,
    {
        let mut attributes = self.attributes.write();
        *attributes = update(&attributes)?;
        self.last_modified_timestamp
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Validate and enqueue a message, waking any long-polling receivers.
    pub fn send(
        &self,
        body: String,
        attributes: Vec<(String, MessageAttributeValue)>,
    ) -> Result<SentMessage, SqsError> {
        self.ensure_live()?;
        let max_size = self.attributes.read().maximum_message_size as usize;
        let message = Message::validated(body, attributes, max_size)?;

        let sent = self.state.lock().store.enqueue(message);
        self.notify.notify_waiters();

        debug!(queue = %self.name, message_id = %sent.message_id, "Enqueued message");
        Ok(sent)
    }

    /// Delete the delivery named by `handle`. Returns whether anything was
    /// removed; stale handles are not an error.
    pub fn delete_message(&self, handle: &ReceiptHandle) -> bool {
        self.state.lock().acknowledge(handle)
    }

    /// Reset the visibility deadline of a current delivery. A zero timeout
    /// makes the message available immediately.
    ///
    /// Waiters sleep until the earliest deadline they saw, so they are woken
    /// whenever a deadline moves earlier.
    pub fn change_visibility(
        &self,
        handle: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), SqsError> {
        let now = Instant::now();
        let wake = {
            let mut state = self.state.lock();
            state.release_expired(now);
            let new_deadline = now + timeout;
            let (id, old) = state
                .store
                .change_visibility(handle, new_deadline)
                .ok_or_else(|| SqsError::MessageNotInflight(handle.to_string()))?;
            state.scheduler.reschedule(id, old, new_deadline);
            if timeout.is_zero() {
                state.release_expired(now);
            }
            new_deadline < old
        };
        if wake {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    pub fn purge(&self) -> usize {
        self.state.lock().purge()
    }

    /// Requeue elapsed deliveries now instead of waiting for the next
    /// receive. Returns how many messages became visible.
    pub fn release_expired(&self) -> usize {
        let released = self.state.lock().release_expired(Instant::now());
        if released > 0 {
            self.notify.notify_waiters();
        }
        released
    }

    /// (available, in flight), after releasing elapsed deliveries
    pub fn approximate_counts(&self) -> (usize, usize) {
        self.release_expired();
        let state = self.state.lock();
        (state.store.available_count(), state.store.in_flight_count())
    }

    pub fn snapshot_available(&self) -> Vec<Message> {
        self.release_expired();
        self.state.lock().store.snapshot_available()
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        self.state.lock().purge();
        self.notify.notify_waiters();
    }

    pub(crate) fn ensure_live(&self) -> Result<(), SqsError> {
        if self.is_deleted() {
            return Err(SqsError::QueueNotFound(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub(crate) fn notify_waiters(&self) {
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Queue {
        Queue::new(QueueId(1), "test".into(), QueueAttributes::default())
    }

    #[tokio::test]
    async fn test_send_validates_before_storing() {
        let q = queue();
        assert!(matches!(
            q.send(String::new(), vec![]),
            Err(SqsError::InvalidBody(_))
        ));
        assert!(matches!(
            q.send("A".repeat(262_145), vec![]),
            Err(SqsError::MessageTooLong { .. })
        ));
        assert_eq!(q.approximate_counts(), (0, 0));

        q.send("hello".into(), vec![]).unwrap();
        assert_eq!(q.approximate_counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_send_respects_queue_maximum_size() {
        let q = queue();
        q.update_attributes(|current| {
            Ok(QueueAttributes {
                maximum_message_size: 1024,
                ..current.clone()
            })
        })
        .unwrap();
        assert!(matches!(
            q.send("A".repeat(1025), vec![]),
            Err(SqsError::MessageTooLong {
                size: 1025,
                max: 1024
            })
        ));
        assert!(q.send("A".repeat(1024), vec![]).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_expired_requeues() {
        let q = queue();
        let sent = q.send("hello".into(), vec![]).unwrap();
        let handle = {
            let mut state = q.lock();
            state.deliver(sent.message_id, Instant::now(), Duration::from_secs(10))
        }
        .unwrap();
        assert_eq!(q.approximate_counts(), (0, 1));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(q.approximate_counts(), (1, 0));
        // The handle died with the delivery
        assert!(!q.delete_message(&handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_visibility_zero_makes_visible() {
        let q = queue();
        let sent = q.send("hello".into(), vec![]).unwrap();
        let handle = q
            .lock()
            .deliver(sent.message_id, Instant::now(), Duration::from_secs(30))
            .unwrap();

        q.change_visibility(&handle, Duration::ZERO).unwrap();
        assert_eq!(q.approximate_counts(), (1, 0));
        assert!(matches!(
            q.change_visibility(&handle, Duration::from_secs(5)),
            Err(SqsError::MessageNotInflight(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_queue_rejects_sends() {
        let q = queue();
        q.send("hello".into(), vec![]).unwrap();
        q.mark_deleted();
        assert!(q.is_deleted());
        assert_eq!(q.approximate_counts(), (0, 0));
        assert!(matches!(
            q.send("again".into(), vec![]),
            Err(SqsError::QueueNotFound(_))
        ));
    }
}
