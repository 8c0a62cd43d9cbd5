//! Bounded Event Queue
//!
//! Single-consumer queue between producers and the delivery loop. Pushing
//! never waits; when the queue is full the configured [`OverflowPolicy`]
//! decides which event is lost.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::event::Event;

/// What to do with a publish when the queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room
    #[default]
    DropOldest,
    /// Discard the event being published
    DropNewest,
}

/// Result of pushing one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    /// Queued, an older event was evicted
    EvictedOldest,
    /// Not queued, the queue was full
    Rejected,
    /// Not queued, the queue no longer accepts events
    Closed,
}

struct QueueState {
    events: VecDeque<Event>,
    closed: bool,
}

pub(crate) struct EventQueue {
    state: Mutex<QueueState>,
    ready: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Notify::new(),
            capacity,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: Event) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }

            if state.events.len() < self.capacity {
                state.events.push_back(event);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        state.events.pop_front();
                        state.events.push_back(event);
                        PushOutcome::EvictedOldest
                    }
                    OverflowPolicy::DropNewest => PushOutcome::Rejected,
                }
            }
        };

        if outcome != PushOutcome::Rejected {
            self.ready.notify_one();
        }
        outcome
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<Event> {
        loop {
            let ready = self.ready.notified();
            {
                let mut state = self.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            ready.await;
        }
    }

    /// Stop accepting events; queued events can still be popped
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_one();
    }

    /// Discard everything still queued, returning how many were lost
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let abandoned = state.events.len();
        state.events.clear();
        abandoned
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn event(n: i64) -> Event {
        Event::new("vote_cast", json!({ "id": n }))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = EventQueue::new(8, OverflowPolicy::DropOldest);
        for n in 0..3 {
            assert_eq!(queue.push(event(n)), PushOutcome::Queued);
        }

        for n in 0..3 {
            assert_eq!(queue.pop().await.unwrap(), event(n));
        }
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_head() {
        let queue = EventQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(event(1));
        queue.push(event(2));

        assert_eq!(queue.push(event(3)), PushOutcome::EvictedOldest);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await.unwrap(), event(2));
        assert_eq!(queue.pop().await.unwrap(), event(3));
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_queue() {
        let queue = EventQueue::new(2, OverflowPolicy::DropNewest);
        queue.push(event(1));
        queue.push(event(2));

        assert_eq!(queue.push(event(3)), PushOutcome::Rejected);
        assert_eq!(queue.pop().await.unwrap(), event(1));
        assert_eq!(queue.pop().await.unwrap(), event(2));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = EventQueue::new(4, OverflowPolicy::DropOldest);
        queue.push(event(1));
        queue.close();

        assert_eq!(queue.push(event(2)), PushOutcome::Closed);
        assert_eq!(queue.pop().await.unwrap(), event(1));
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(EventQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(event(5));

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, Some(event(5)));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_close() {
        let queue = Arc::new(EventQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
    }

    #[test]
    fn test_clear_reports_abandoned() {
        let queue = EventQueue::new(4, OverflowPolicy::DropOldest);
        queue.push(event(1));
        queue.push(event(2));

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_policy_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: OverflowPolicy,
        }
        let w: Wrapper = toml::from_str(r#"policy = "drop_newest""#).unwrap();
        assert_eq!(w.policy, OverflowPolicy::DropNewest);
    }
}
