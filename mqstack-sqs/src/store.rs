//! Per-queue message storage

use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;

use crate::message::{Delivery, Message, MessageId, ReceiptHandle, SentMessage};

/// Message bodies and delivery state for one queue.
///
/// Every message is either available (and listed in `available`) or in
/// flight (holding the one receipt handle that can delete it).
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: HashMap<MessageId, Message>,
    available: VecDeque<MessageId>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an already validated message as available.
    pub fn enqueue(&mut self, mut message: Message) -> SentMessage {
        message.delivery = Delivery::Available;
        let sent = SentMessage {
            message_id: message.id,
            md5_of_message_body: message.md5_of_body.clone(),
            md5_of_message_attributes: message.md5_of_message_attributes.clone(),
        };
        self.available.push_back(message.id);
        self.messages.insert(message.id, message);
        sent
    }

    /// Oldest available message, if any. Standard queues make no ordering
    /// promise; this is simply the cheapest pick.
    pub fn next_available(&self) -> Option<MessageId> {
        self.available.front().copied()
    }

    /// Move an available message in flight, bumping its receive count and
    /// issuing a fresh receipt handle. Returns `None` if the message is not
    /// currently available.
    pub fn mark_delivered(&mut self, id: MessageId, deadline: Instant) -> Option<ReceiptHandle> {
        let message = self.messages.get_mut(&id)?;
        if !message.is_available() {
            return None;
        }
        remove_id(&mut self.available, id);

        message.receive_count += 1;
        message
            .first_receive_timestamp
            .get_or_insert_with(|| chrono::Utc::now().timestamp_millis());
        let receipt_handle = ReceiptHandle::issue(id, message.receive_count);
        message.delivery = Delivery::InFlight {
            receipt_handle: receipt_handle.clone(),
            deadline,
        };
        Some(receipt_handle)
    }

    /// Delete the message if `handle` belongs to its current delivery.
    /// Stale, foreign or malformed handles leave the store untouched.
    pub fn acknowledge(&mut self, handle: &ReceiptHandle) -> Option<Message> {
        let id = handle.message_id()?;
        if self.messages.get(&id)?.receipt_handle() != Some(handle) {
            return None;
        }
        self.messages.remove(&id)
    }

    /// Return an in-flight message to the available set, invalidating its
    /// receipt handle.
    pub fn requeue(&mut self, id: MessageId) -> bool {
        match self.messages.get_mut(&id) {
            Some(message) if !message.is_available() => {
                message.delivery = Delivery::Available;
                self.available.push_back(id);
                true
            }
            _ => false,
        }
    }

    /// Move the deadline of the delivery identified by `handle`. Returns the
    /// message id and previous deadline.
    pub fn change_visibility(
        &mut self,
        handle: &ReceiptHandle,
        new_deadline: Instant,
    ) -> Option<(MessageId, Instant)> {
        let id = handle.message_id()?;
        let message = self.messages.get_mut(&id)?;
        match &mut message.delivery {
            Delivery::InFlight {
                receipt_handle,
                deadline,
            } if receipt_handle == handle => {
                let old = std::mem::replace(deadline, new_deadline);
                Some((id, old))
            }
            _ => None,
        }
    }

    /// Take a message out of the store regardless of its state.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let message = self.messages.remove(&id)?;
        if message.is_available() {
            remove_id(&mut self.available, id);
        }
        Some(message)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Copies of the currently available messages
    pub fn snapshot_available(&self) -> Vec<Message> {
        self.available
            .iter()
            .filter_map(|id| self.messages.get(id))
            .cloned()
            .collect()
    }

    /// Drop everything; returns how many messages were discarded.
    pub fn purge(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        self.available.clear();
        count
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.messages.len() - self.available.len()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn remove_id(ids: &mut VecDeque<MessageId>, id: MessageId) {
    if ids.front() == Some(&id) {
        ids.pop_front();
    } else {
        ids.retain(|other| *other != id);
    }
}
