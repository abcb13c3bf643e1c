//! Receive with optional long polling
//!
//! A receive first tries to take messages synchronously under the queue lock.
//! When nothing is available and the wait window is open, it parks on the
//! queue's [`Notify`](tokio::sync::Notify) until a send, requeue or redrive
//! signals it, the earliest visibility deadline passes, or the window
//! closes. The lock is never held while parked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::attributes::{MAX_VISIBILITY_TIMEOUT, MAX_WAIT_TIME_SECONDS};
use crate::error::SqsError;
use crate::message::{md5_of_attributes, Message, MessageAttributes, ReceiptHandle, ReceivedMessage};
use crate::queue::Queue;
use crate::redrive::RedriveCoordinator;
use crate::registry::QueueRegistry;

pub const MAX_RECEIVE_BATCH: u32 = 10;

pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
pub const SENT_TIMESTAMP: &str = "SentTimestamp";
pub const APPROXIMATE_FIRST_RECEIVE_TIMESTAMP: &str = "ApproximateFirstReceiveTimestamp";

/// Per-call receive parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveOptions {
    pub max_messages: u32,
    /// `None` falls back to the queue's ReceiveMessageWaitTimeSeconds.
    pub wait_time_seconds: Option<u32>,
    /// `None` uses the queue's VisibilityTimeout.
    pub visibility_timeout: Option<u32>,
    /// System attributes to return
    pub attribute_names: Vec<String>,
    /// Message attributes to return: exact names, `All`, `.*` or `prefix.*`
    pub message_attribute_names: Vec<String>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time_seconds: None,
            visibility_timeout: None,
            attribute_names: Vec::new(),
            message_attribute_names: Vec::new(),
        }
    }
}

impl ReceiveOptions {
    pub fn validate(&self) -> Result<(), SqsError> {
        if !(1..=MAX_RECEIVE_BATCH).contains(&self.max_messages) {
            return Err(SqsError::InvalidParameterValue(format!(
                "MaxNumberOfMessages must be between 1 and {MAX_RECEIVE_BATCH}, got {}",
                self.max_messages
            )));
        }
        if let Some(wait) = self.wait_time_seconds.filter(|w| *w > MAX_WAIT_TIME_SECONDS) {
            return Err(SqsError::InvalidParameterValue(format!(
                "WaitTimeSeconds must be between 0 and {MAX_WAIT_TIME_SECONDS}, got {wait}"
            )));
        }
        if let Some(vt) = self.visibility_timeout.filter(|v| *v > MAX_VISIBILITY_TIMEOUT) {
            return Err(SqsError::InvalidParameterValue(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}, got {vt}"
            )));
        }
        Ok(())
    }

    fn wants_system_attribute(&self, name: &str) -> bool {
        self.attribute_names.iter().any(|n| n == "All" || n == name)
    }

    fn wants_message_attribute(&self, name: &str) -> bool {
        self.message_attribute_names.iter().any(|filter| {
            filter == "All"
                || filter == ".*"
                || filter == name
                || filter
                    .strip_suffix('*')
                    .is_some_and(|prefix| prefix.ends_with('.') && name.starts_with(prefix))
        })
    }
}

pub struct ReceiveDispatcher<'a> {
    registry: &'a QueueRegistry,
}

impl<'a> ReceiveDispatcher<'a> {
    pub fn new(registry: &'a QueueRegistry) -> Self {
        Self { registry }
    }

    /// Receive up to `max_messages`, waiting at most the effective wait time
    /// for the first one to arrive. Dropping the returned future abandons the
    /// wait without side effects.
    pub async fn receive(
        &self,
        queue: &Queue,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        options.validate()?;
        queue.ensure_live()?;

        let wait_seconds = options
            .wait_time_seconds
            .unwrap_or_else(|| queue.attributes().receive_message_wait_time_seconds);
        let wait_deadline = Instant::now() + Duration::from_secs(u64::from(wait_seconds));

        loop {
            // Registered before checking so a send between the check and the
            // await still wakes us.
            let notified = queue.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            queue.ensure_live()?;
            let (batch, next_deadline) = self.try_receive(queue, options);
            if !batch.is_empty() {
                debug!(queue = %queue.name(), count = batch.len(), "Received messages");
                return Ok(batch);
            }
            if Instant::now() >= wait_deadline {
                return Ok(batch);
            }

            let wake_at = next_deadline.map_or(wait_deadline, |d| d.min(wait_deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    /// One non-blocking pass. Also returns the earliest pending visibility
    /// deadline so a waiter knows when to look again.
    pub fn try_receive(
        &self,
        queue: &Queue,
        options: &ReceiveOptions,
    ) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let redrive = RedriveCoordinator::new(self.registry);
        let mut target = redrive.resolve_target(queue);
        let visibility = options.visibility_timeout.map_or_else(
            || queue.attributes().visibility_timeout(),
            |secs| Duration::from_secs(u64::from(secs)),
        );
        let max = options.max_messages as usize;
        let mut batch = Vec::new();
        let mut first_pass = true;

        loop {
            let now = Instant::now();
            let mut state = queue.lock();
            // Only once per call: a zero visibility timeout must not hand the
            // same message out twice in one batch.
            if std::mem::take(&mut first_pass) {
                let released = state.release_expired(now);
                if released > 0 {
                    debug!(queue = %queue.name(), count = released, "Released expired deliveries");
                }
            }

            let mut divert = None;
            while batch.len() < max {
                let Some(id) = state.store.next_available() else {
                    break;
                };
                let over_limit = match (&target, state.store.get(id)) {
                    (Some(t), Some(m)) => m.receive_count >= t.max_receive_count,
                    _ => false,
                };
                if over_limit {
                    divert = Some(id);
                    break;
                }
                let Some(handle) = state.deliver(id, now, visibility) else {
                    break;
                };
                if let Some(message) = state.store.get(id) {
                    batch.push(to_received(message, handle, options));
                }
            }
            let next_deadline = state.scheduler.next_deadline();
            drop(state);

            let (Some(id), Some(t)) = (divert, target.as_ref()) else {
                return (batch, next_deadline);
            };
            let moved = redrive.divert(queue, &t.queue, id).is_some();
            if !moved {
                target = redrive.resolve_target(queue);
            }
        }
    }
}

fn to_received(
    message: &Message,
    receipt_handle: ReceiptHandle,
    options: &ReceiveOptions,
) -> ReceivedMessage {
    let mut attributes = BTreeMap::new();
    if options.wants_system_attribute(APPROXIMATE_RECEIVE_COUNT) {
        attributes.insert(
            APPROXIMATE_RECEIVE_COUNT.to_string(),
            message.receive_count.to_string(),
        );
    }
    if options.wants_system_attribute(SENT_TIMESTAMP) {
        attributes.insert(SENT_TIMESTAMP.to_string(), message.sent_timestamp.to_string());
    }
    if options.wants_system_attribute(APPROXIMATE_FIRST_RECEIVE_TIMESTAMP) {
        if let Some(first) = message.first_receive_timestamp {
            attributes.insert(
                APPROXIMATE_FIRST_RECEIVE_TIMESTAMP.to_string(),
                first.to_string(),
            );
        }
    }

    let message_attributes: MessageAttributes = message
        .attributes
        .iter()
        .filter(|(name, _)| options.wants_message_attribute(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    ReceivedMessage {
        message_id: message.id,
        receipt_handle,
        body: message.body.clone(),
        md5_of_body: message.md5_of_body.clone(),
        md5_of_message_attributes: md5_of_attributes(&message_attributes),
        attributes,
        message_attributes,
    }
}
