//! Visibility deadlines for in-flight messages
//!
//! Deadlines are evaluated lazily: whoever touches a queue first calls
//! [`VisibilityScheduler::pop_expired`] and requeues what it returns.

use std::collections::BTreeSet;
use tokio::time::Instant;

use crate::message::MessageId;

#[derive(Debug, Default)]
pub struct VisibilityScheduler {
    deadlines: BTreeSet<(Instant, MessageId)>,
}

impl VisibilityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, id: MessageId, deadline: Instant) {
        self.deadlines.insert((deadline, id));
    }

    /// Returns false if no such entry was scheduled.
    pub fn cancel(&mut self, id: MessageId, deadline: Instant) -> bool {
        self.deadlines.remove(&(deadline, id))
    }

    pub fn reschedule(&mut self, id: MessageId, old: Instant, new: Instant) {
        self.cancel(id, old);
        self.schedule(id, new);
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every entry whose deadline is at or before `now`,
    /// earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<MessageId> {
        let mut expired = Vec::new();
        while let Some(&(deadline, id)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            expired.push(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}
