//! Per-job progress fan-out.
//!
//! Delivery is best-effort and non-blocking: each subscriber owns a bounded
//! channel, publish is a `try_send`, and a subscriber whose buffer is full
//! is dropped (its channel closes, which ends its streaming connection).
//! The job row remains the state of record; reconnecting clients must
//! re-fetch the job.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Per-subscriber outbound buffer size.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Events published by the executor and lifecycle writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JobEvent {
    Progress {
        percent: i32,
        current_operation: Option<String>,
        eta_seconds: i64,
    },
    Completed {
        output_file_id: String,
    },
    Failed {
        message: String,
    },
    Cancelled,
}

/// An event addressed to one job's subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub job_id: String,
    pub event: JobEvent,
}

pub type SubscriberId = u64;

#[derive(Default)]
struct BusState {
    subscribers: HashMap<SubscriberId, mpsc::Sender<BusMessage>>,
    topics: HashMap<String, HashSet<SubscriberId>>,
    memberships: HashMap<SubscriberId, HashSet<String>>,
}

impl BusState {
    fn remove_subscriber(&mut self, id: SubscriberId) {
        self.subscribers.remove(&id);
        if let Some(jobs) = self.memberships.remove(&id) {
            for job_id in jobs {
                if let Some(set) = self.topics.get_mut(&job_id) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.topics.remove(&job_id);
                    }
                }
            }
        }
    }
}

/// Fan-out bus: `job id -> set of subscribers`.
pub struct ProgressBus {
    state: RwLock<BusState>,
    next_id: AtomicU64,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BusState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a live connection; the receiver is its outbound pump.
    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.write().subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn subscribe(&self, id: SubscriberId, job_id: &str) {
        let mut state = self.state.write();
        if !state.subscribers.contains_key(&id) {
            return;
        }
        state
            .topics
            .entry(job_id.to_string())
            .or_default()
            .insert(id);
        state
            .memberships
            .entry(id)
            .or_default()
            .insert(job_id.to_string());
    }

    pub fn unsubscribe(&self, id: SubscriberId, job_id: &str) {
        let mut state = self.state.write();
        if let Some(set) = state.topics.get_mut(job_id) {
            set.remove(&id);
            if set.is_empty() {
                state.topics.remove(job_id);
            }
        }
        if let Some(jobs) = state.memberships.get_mut(&id) {
            jobs.remove(job_id);
        }
    }

    pub fn unregister(&self, id: SubscriberId) {
        self.state.write().remove_subscriber(id);
    }

    /// Publish to every subscriber of `job_id`.
    ///
    /// Never blocks: a subscriber that cannot keep up (full buffer) or is
    /// gone (closed channel) is dropped; the rest are unaffected.
    pub fn publish(&self, job_id: &str, event: JobEvent) {
        let mut stale: Vec<SubscriberId> = Vec::new();
        {
            let state = self.state.read();
            let Some(subscriber_ids) = state.topics.get(job_id) else {
                return;
            };
            let message = BusMessage {
                job_id: job_id.to_string(),
                event,
            };
            for id in subscriber_ids {
                let Some(tx) = state.subscribers.get(id) else {
                    continue;
                };
                if tx.try_send(message.clone()).is_err() {
                    stale.push(*id);
                }
            }
        }

        if !stale.is_empty() {
            let mut state = self.state.write();
            for id in stale {
                debug!(subscriber = id, job_id, "Dropping slow or closed subscriber");
                state.remove_subscriber(id);
            }
        }
    }

    /// Subscribers currently attached to a job.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.state
            .read()
            .topics
            .get(job_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(percent: i32) -> JobEvent {
        JobEvent::Progress {
            percent,
            current_operation: None,
            eta_seconds: 0,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let bus = ProgressBus::new();
        let (id, mut rx) = bus.register();
        bus.subscribe(id, "job-1");

        for percent in [10, 20, 30] {
            bus.publish("job-1", progress(percent));
        }
        bus.publish("job-1", JobEvent::Completed {
            output_file_id: "file-1".to_string(),
        });

        let mut percents = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap().event {
                JobEvent::Progress { percent, .. } => percents.push(percent),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(percents, vec![10, 20, 30]);
        assert!(matches!(
            rx.recv().await.unwrap().event,
            JobEvent::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_events_are_scoped_to_job() {
        let bus = ProgressBus::new();
        let (id, mut rx) = bus.register();
        bus.subscribe(id, "job-1");

        bus.publish("job-2", progress(50));
        bus.publish("job-1", progress(10));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.job_id, "job-1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped_fast_one_unaffected() {
        let bus = ProgressBus::new();
        let (slow, mut slow_rx) = bus.register();
        let (fast, mut fast_rx) = bus.register();
        bus.subscribe(slow, "job-1");
        bus.subscribe(fast, "job-1");

        // Fill the slow subscriber's buffer; the fast one keeps draining.
        for i in 0..SUBSCRIBER_BUFFER as i32 {
            bus.publish("job-1", progress(i % 100));
            assert!(fast_rx.try_recv().is_ok());
        }
        assert_eq!(bus.subscriber_count("job-1"), 2);

        // One more publish overflows the slow buffer: the slow subscriber
        // is dropped within this single publish, the fast one still
        // receives the event.
        bus.publish("job-1", progress(99));
        assert_eq!(bus.subscriber_count("job-1"), 1);
        match fast_rx.try_recv().unwrap().event {
            JobEvent::Progress { percent, .. } => assert_eq!(percent, 99),
            other => panic!("unexpected event {:?}", other),
        }

        // The slow subscriber's channel is closed after its buffered
        // backlog; it never sees the overflow event.
        let mut slow_received = 0;
        while slow_rx.try_recv().is_ok() {
            slow_received += 1;
        }
        assert_eq!(slow_received, SUBSCRIBER_BUFFER);
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = ProgressBus::new();
        let (id, mut rx) = bus.register();
        bus.subscribe(id, "job-1");
        bus.unsubscribe(id, "job-1");

        bus.publish("job-1", progress(10));
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count("job-1"), 0);
    }

    #[tokio::test]
    async fn test_unregister_cleans_topics() {
        let bus = ProgressBus::new();
        let (id, _rx) = bus.register();
        bus.subscribe(id, "job-1");
        bus.subscribe(id, "job-2");
        bus.unregister(id);
        assert_eq!(bus.subscriber_count("job-1"), 0);
        assert_eq!(bus.subscriber_count("job-2"), 0);
    }
}
