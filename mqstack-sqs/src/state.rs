//! Service facade over the queue engine
//!
//! One `SqsState` is one independent queue service. Handlers and tests hold
//! it behind an `Arc`; nothing here is global.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::attributes::{QueueAttributeName, QueueAttributes, MAX_VISIBILITY_TIMEOUT};
use crate::dispatcher::{ReceiveDispatcher, ReceiveOptions};
use crate::error::SqsError;
use crate::message::{MessageAttributeValue, ReceiptHandle, ReceivedMessage, SentMessage};
use crate::queue::Queue;
use crate::registry::QueueRegistry;

/// State for queue handlers
#[derive(Debug, Default)]
pub struct SqsState {
    registry: QueueRegistry,
}

impl SqsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// New queues start from `defaults` instead of the built-in attributes.
    pub fn with_defaults(defaults: QueueAttributes) -> Self {
        Self {
            registry: QueueRegistry::new(defaults),
        }
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn create_queue(
        &self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<Arc<Queue>, SqsError> {
        self.registry.create_queue(name, attributes)
    }

    pub fn get_queue(&self, name: &str) -> Result<Arc<Queue>, SqsError> {
        self.registry.get_queue(name)
    }

    pub fn delete_queue(&self, name: &str) {
        self.registry.delete_queue(name);
    }

    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        self.registry.list_queues(prefix)
    }

    pub fn send_message(
        &self,
        queue_name: &str,
        body: String,
        attributes: Vec<(String, MessageAttributeValue)>,
    ) -> Result<SentMessage, SqsError> {
        self.registry.get_queue(queue_name)?.send(body, attributes)
    }

    pub async fn receive_message(
        &self,
        queue_name: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        let queue = self.registry.get_queue(queue_name)?;
        ReceiveDispatcher::new(&self.registry)
            .receive(&queue, options)
            .await
    }

    /// Deleting with a stale or unknown handle succeeds without effect.
    pub fn delete_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), SqsError> {
        let queue = self.registry.get_queue(queue_name)?;
        if queue.delete_message(receipt_handle) {
            debug!(queue = %queue_name, "Deleted message");
        } else {
            debug!(
                queue = %queue_name,
                receipt_handle = %receipt_handle,
                "Stale receipt handle ignored"
            );
        }
        Ok(())
    }

    pub fn change_message_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        visibility_timeout: u32,
    ) -> Result<(), SqsError> {
        if visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(SqsError::InvalidParameterValue(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}"
            )));
        }
        let queue = self.registry.get_queue(queue_name)?;
        queue.change_visibility(
            receipt_handle,
            Duration::from_secs(u64::from(visibility_timeout)),
        )?;
        debug!(queue = %queue_name, visibility_timeout, "Changed message visibility");
        Ok(())
    }

    /// Returns how many messages were discarded.
    pub fn purge_queue(&self, queue_name: &str) -> Result<usize, SqsError> {
        let purged = self.registry.get_queue(queue_name)?.purge();
        info!(queue = %queue_name, count = purged, "Purged queue");
        Ok(purged)
    }

    /// Resolve `names` (`All` expands to every attribute). An empty request
    /// returns nothing.
    pub fn get_queue_attributes(
        &self,
        queue_name: &str,
        names: &[String],
    ) -> Result<BTreeMap<String, String>, SqsError> {
        let queue = self.registry.get_queue(queue_name)?;

        let mut requested = Vec::new();
        for name in names {
            match name.parse::<QueueAttributeName>()? {
                QueueAttributeName::All => requested.extend(QueueAttributeName::READABLE),
                other => requested.push(other),
            }
        }

        let attributes = queue.attributes();
        let (available, in_flight) = queue.approximate_counts();
        let mut result = BTreeMap::new();
        for name in requested {
            let value = match name {
                QueueAttributeName::VisibilityTimeout => attributes.visibility_timeout.to_string(),
                QueueAttributeName::ReceiveMessageWaitTimeSeconds => {
                    attributes.receive_message_wait_time_seconds.to_string()
                }
                QueueAttributeName::MaximumMessageSize => {
                    attributes.maximum_message_size.to_string()
                }
                QueueAttributeName::RedrivePolicy => match &attributes.redrive_policy {
                    Some(policy) => policy.to_json(),
                    None => continue,
                },
                QueueAttributeName::QueueName => queue.name().to_string(),
                QueueAttributeName::CreatedTimestamp => queue.created_timestamp().to_string(),
                QueueAttributeName::LastModifiedTimestamp => {
                    queue.last_modified_timestamp().to_string()
                }
                QueueAttributeName::ApproximateNumberOfMessages => available.to_string(),
                QueueAttributeName::ApproximateNumberOfMessagesNotVisible => in_flight.to_string(),
                QueueAttributeName::All => continue,
            };
            result.insert(name.as_str().to_string(), value);
        }
        Ok(result)
    }

    pub fn set_queue_attributes(
        &self,
        queue_name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), SqsError> {
        self.registry.set_queue_attributes(queue_name, attributes)
    }

    pub fn list_dead_letter_source_queues(
        &self,
        queue_name: &str,
    ) -> Result<Vec<String>, SqsError> {
        self.registry.dead_letter_source_queues(queue_name)
    }

    /// Release every elapsed visibility deadline on every queue. Returns how
    /// many messages became visible.
    pub fn sweep(&self) -> usize {
        let released: usize = self
            .registry
            .all()
            .iter()
            .map(|queue| queue.release_expired())
            .sum();
        if released > 0 {
            debug!(count = released, "Sweep released expired deliveries");
        }
        released
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval = ?interval, "Starting visibility sweeper");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}
