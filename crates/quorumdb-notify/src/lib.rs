//! quorumdb-notify: the pending-proposal notification queue (C2).
//!
//! Used by the CLI to show the operator what votes are outstanding; the
//! vote itself is cast against C6/C7, not against the queue. The queue
//! presents LIFO for display (newest proposal first) and scans FIFO
//! (oldest first) for expiry, since expired entries accumulate at the back
//! of arrival order regardless of display order.

use std::sync::Mutex;

use quorumdb_core::{Deadline, ProposalId};
use serde::{Deserialize, Serialize};

/// One pending proposal awaiting this peer's vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub deadline: Deadline,
    pub proposal_id: ProposalId,
    pub share_id: u64,
}

#[derive(Default)]
pub struct NotificationQueue {
    // Arrival order (oldest first); `push`/`snapshot` reverse this view so
    // the operator sees the newest proposal at the top.
    entries: Mutex<Vec<Notification>>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, notification: Notification) {
        self.entries.lock().expect("notification queue lock poisoned").push(notification);
    }

    /// Removes and returns the notification at display index `index`
    /// (0 = newest), or `None` if out of range.
    pub fn remove_at(&self, index: usize) -> Option<Notification> {
        let mut entries = self.entries.lock().expect("notification queue lock poisoned");
        let len = entries.len();
        let arrival_index = len.checked_sub(1)?.checked_sub(index)?;
        if arrival_index >= entries.len() {
            return None;
        }
        Some(entries.remove(arrival_index))
    }

    /// Drops every notification whose deadline has passed, oldest first.
    /// Returns how many were dropped.
    pub fn remove_expired(&self) -> usize {
        let mut entries = self.entries.lock().expect("notification queue lock poisoned");
        let before = entries.len();
        entries.retain(|n| !n.deadline.has_passed());
        before - entries.len()
    }

    /// A LIFO-ordered copy for display: newest proposal first.
    pub fn snapshot(&self) -> Vec<Notification> {
        let mut entries = self
            .entries
            .lock()
            .expect("notification queue lock poisoned")
            .clone();
        entries.reverse();
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("notification queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumdb_core::Deadline;

    fn sample(msg: &str, deadline_millis: u64) -> Notification {
        Notification {
            message: msg.to_string(),
            deadline: Deadline(deadline_millis),
            proposal_id: ProposalId::generate(),
            share_id: 1,
        }
    }

    #[test]
    fn snapshot_is_newest_first() {
        let queue = NotificationQueue::new();
        queue.push(sample("first", u64::MAX));
        queue.push(sample("second", u64::MAX));

        let snap = queue.snapshot();
        assert_eq!(snap[0].message, "second");
        assert_eq!(snap[1].message, "first");
    }

    #[test]
    fn remove_at_zero_removes_newest() {
        let queue = NotificationQueue::new();
        queue.push(sample("first", u64::MAX));
        queue.push(sample("second", u64::MAX));

        let removed = queue.remove_at(0).unwrap();
        assert_eq!(removed.message, "second");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.snapshot()[0].message, "first");
    }

    #[test]
    fn remove_expired_drops_only_past_deadlines() {
        let queue = NotificationQueue::new();
        queue.push(sample("expired", 0));
        queue.push(sample("alive", u64::MAX));

        let dropped = queue.remove_expired();
        assert_eq!(dropped, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.snapshot()[0].message, "alive");
    }

    #[test]
    fn remove_at_out_of_range_returns_none() {
        let queue = NotificationQueue::new();
        assert_eq!(queue.remove_at(0), None);
        queue.push(sample("only", u64::MAX));
        assert_eq!(queue.remove_at(5), None);
    }
}
