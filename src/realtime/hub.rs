//! Realtime Fan-Out Hub
//!
//! Owns the subscriber registry and the event queue. Producers publish
//! through a [`Publisher`] without ever waiting on subscriber I/O; a single
//! delivery loop drains the queue and writes each event to every registered
//! subscriber, dropping the ones whose write fails.

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::event::Event;
use super::queue::{EventQueue, OverflowPolicy, PushOutcome};
use super::registry::Registry;
use super::subscriber::{DeliveryError, Subscriber, SubscriberId};

/// Configuration for the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Maximum number of events waiting for delivery
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Which event is lost when the queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Deadline for a single write to a single subscriber
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    /// How long shutdown waits for queued events to be delivered
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Connection limit enforced by `try_register` (0 = unlimited)
    #[serde(default)]
    pub max_connections: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_write_timeout() -> u64 {
    2000
}

fn default_drain_timeout() -> u64 {
    5000
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            write_timeout_ms: default_write_timeout(),
            drain_timeout_ms: default_drain_timeout(),
            max_connections: 0,
        }
    }
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Point-in-time hub counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Events accepted into the queue
    pub published: u64,
    /// Successful per-subscriber writes
    pub delivered: u64,
    /// Events lost to overflow, shutdown or abandonment
    pub dropped: u64,
    /// Subscribers removed after a failed write
    pub failed_deliveries: u64,
    /// Currently registered subscribers
    pub subscribers: usize,
    /// Events waiting for the delivery loop
    pub queued: usize,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed_deliveries: AtomicU64,
}

enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

struct Shared {
    registry: Registry,
    queue: EventQueue,
    counters: Counters,
    config: HubConfig,
}

/// Owned fan-out hub with an explicit start/shutdown lifecycle
///
/// Cloning is cheap; all clones drive the same registry and queue.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

/// Publish-only handle handed to producers
#[derive(Clone)]
pub struct Publisher {
    shared: Arc<Shared>,
}

impl Hub {
    /// Create a hub; nothing is delivered until [`Hub::start`]
    pub fn new(config: HubConfig) -> Self {
        let queue = EventQueue::new(config.queue_capacity, config.overflow_policy);

        Self {
            shared: Arc::new(Shared {
                registry: Registry::new(),
                queue,
                counters: Counters::default(),
                config,
            }),
            lifecycle: Arc::new(Mutex::new(Lifecycle::Idle)),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the delivery loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), HubError> {
        let mut lifecycle = self.lifecycle();
        match &*lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => return Err(HubError::AlreadyStarted),
            Lifecycle::Stopped => return Err(HubError::Stopped),
        }

        let shared = Arc::clone(&self.shared);
        *lifecycle = Lifecycle::Running(tokio::spawn(run_delivery_loop(shared)));

        tracing::info!(
            queue_capacity = self.shared.config.queue_capacity,
            overflow_policy = ?self.shared.config.overflow_policy,
            write_timeout_ms = self.shared.config.write_timeout_ms,
            "Realtime hub started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_))
    }

    /// Stop the hub
    ///
    /// Closes the queue, gives the delivery loop `drain_timeout` to deliver
    /// what is already queued, abandons the rest, then unregisters and closes
    /// every remaining subscriber.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let previous = {
            let mut lifecycle = self.lifecycle();
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };
        let worker = match previous {
            Lifecycle::Running(handle) => Some(handle),
            Lifecycle::Idle => None,
            Lifecycle::Stopped => return Err(HubError::Stopped),
        };

        self.shared.queue.close();

        if let Some(mut handle) = worker {
            let drain = self.shared.config.drain_timeout();
            match tokio::time::timeout(drain, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Delivery loop terminated abnormally"),
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        drain_timeout_ms = self.shared.config.drain_timeout_ms,
                        "Delivery loop did not drain in time"
                    );
                }
            }
        }

        let abandoned = self.shared.queue.clear();
        if abandoned > 0 {
            self.shared
                .counters
                .dropped
                .fetch_add(abandoned as u64, Ordering::Relaxed);
            tracing::warn!(abandoned, "Abandoned undelivered events at shutdown");
        }

        let remaining = self.shared.registry.drain().await;
        let closed = remaining.len();
        close_all(remaining, self.shared.config.write_timeout()).await;

        tracing::info!(closed_subscribers = closed, "Realtime hub shut down");
        Ok(())
    }

    /// Add a connected subscriber
    pub async fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = self.shared.registry.insert(subscriber).await;
        tracing::info!(subscriber_id = %id, "Subscriber connected");
        id
    }

    /// Add a subscriber subject to the configured connection limit
    pub async fn try_register(
        &self,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriberId, HubError> {
        let limit = self.shared.config.max_connections;
        let id = self.shared.registry.try_insert(subscriber, limit).await?;
        tracing::info!(subscriber_id = %id, "Subscriber connected");
        Ok(id)
    }

    /// Remove a subscriber; unknown or already removed ids are ignored
    pub async fn unregister(&self, id: &str) {
        if self.shared.registry.remove(id).await.is_some() {
            tracing::info!(subscriber_id = %id, "Subscriber disconnected");
        }
    }

    /// Queue an event for every connected subscriber
    pub fn publish(&self, event: Event) {
        self.shared.publish(event);
    }

    /// Producer handle sharing this hub's queue
    pub fn publisher(&self) -> Publisher {
        Publisher {
            shared: Arc::clone(&self.shared),
        }
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.shared.registry.contains(id).await
    }

    pub async fn connection_count(&self) -> usize {
        self.shared.registry.len().await
    }

    pub async fn stats(&self) -> HubStats {
        let counters = &self.shared.counters;
        HubStats {
            published: counters.published.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            failed_deliveries: counters.failed_deliveries.load(Ordering::Relaxed),
            subscribers: self.shared.registry.len().await,
            queued: self.shared.queue.len(),
        }
    }

    /// Limits and deadlines this hub was built with
    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }
}

impl Publisher {
    /// Queue an event; never blocks and never fails
    pub fn publish(&self, event: Event) {
        self.shared.publish(event);
    }

    /// Serialize `payload` and publish it under `kind`
    ///
    /// A payload that cannot be serialized is logged and dropped.
    pub fn notify<T: Serialize>(&self, kind: &str, payload: &T) {
        match Event::from_serialize(kind, payload) {
            Ok(event) => self.shared.publish(event),
            Err(e) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(kind = %kind, error = %e, "Failed to serialize event payload");
            }
        }
    }
}

impl Shared {
    fn publish(&self, event: Event) {
        let kind = event.kind.clone();
        match self.queue.push(event) {
            PushOutcome::Queued => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(kind = %kind, "Event queued");
            }
            PushOutcome::EvictedOldest => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = %kind, "Event queue full, dropped oldest event");
            }
            PushOutcome::Rejected => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = %kind, "Event queue full, dropped new event");
            }
            PushOutcome::Closed => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = %kind, "Hub stopped, event dropped");
            }
        }
    }

    /// Deliver one event to every registered subscriber
    ///
    /// The registry read lock is held for the whole fan-out so membership
    /// cannot change underneath it. Failed subscribers are removed after the
    /// lock is released.
    async fn fan_out(&self, event: &Event) {
        let deadline = self.config.write_timeout();

        let (delivered, failed) = {
            let subscribers = self.registry.snapshot().await;
            let deliveries = subscribers.iter().map(|(id, subscriber)| async move {
                (id, deliver(subscriber.as_ref(), event, deadline).await)
            });

            let mut delivered = 0u64;
            let mut failed = Vec::new();
            for (id, result) in join_all(deliveries).await {
                match result {
                    Ok(()) => delivered += 1,
                    Err(error) => failed.push((id.clone(), error)),
                }
            }
            (delivered, failed)
        };

        self.counters
            .delivered
            .fetch_add(delivered, Ordering::Relaxed);

        if delivered > 0 || !failed.is_empty() {
            tracing::trace!(
                kind = %event.kind,
                delivered,
                failed = failed.len(),
                "Broadcast event"
            );
        }

        if !failed.is_empty() {
            self.remove_failed(failed).await;
        }
    }

    /// Terminal transition for subscribers whose write failed
    ///
    /// All of them leave the registry under one write lock and are closed
    /// concurrently, so dead peers cost at most one deadline together.
    async fn remove_failed(&self, failed: Vec<(SubscriberId, DeliveryError)>) {
        let ids: Vec<&str> = failed.iter().map(|(id, _)| id.as_str()).collect();
        let removed = self.registry.remove_many(&ids).await;

        self.counters
            .failed_deliveries
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        for (id, error) in &failed {
            tracing::warn!(subscriber_id = %id, error = %error, "Delivery failed, subscriber removed");
        }

        close_all(removed, self.config.write_timeout()).await;
    }
}

/// Close subscribers concurrently, each bounded by `deadline` and isolated
/// from panics in its `close`
async fn close_all(subscribers: Vec<(SubscriberId, Arc<dyn Subscriber>)>, deadline: Duration) {
    let closes = subscribers.iter().map(|(id, subscriber)| async move {
        let close = tokio::time::timeout(deadline, subscriber.close());
        match AssertUnwindSafe(close).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(_elapsed)) => {
                tracing::debug!(subscriber_id = %id, "Subscriber close timed out");
            }
            Err(_) => {
                tracing::error!(subscriber_id = %id, "Subscriber panicked while closing");
            }
        }
    });
    join_all(closes).await;
}

/// One time-bounded write, isolated from panics in the subscriber
async fn deliver(
    subscriber: &dyn Subscriber,
    event: &Event,
    deadline: Duration,
) -> Result<(), DeliveryError> {
    let write = tokio::time::timeout(deadline, subscriber.send(event));
    match AssertUnwindSafe(write).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(_elapsed)) => Err(DeliveryError::Timeout(deadline)),
        Err(_) => Err(DeliveryError::Panicked),
    }
}

async fn run_delivery_loop(shared: Arc<Shared>) {
    tracing::debug!("Delivery loop running");

    while let Some(event) = shared.queue.pop().await {
        shared.fan_out(&event).await;
    }

    tracing::debug!("Delivery loop finished");
}

/// Errors that can occur in the hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Hub is already running")]
    AlreadyStarted,

    #[error("Hub has been shut down")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::subscriber::ChannelSubscriber;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Subscriber whose writes never complete
    struct StalledSubscriber;

    #[async_trait]
    impl Subscriber for StalledSubscriber {
        async fn send(&self, _event: &Event) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    /// Subscriber whose writes always fail
    struct BrokenSubscriber;

    #[async_trait]
    impl Subscriber for BrokenSubscriber {
        async fn send(&self, _event: &Event) -> Result<(), DeliveryError> {
            Err(DeliveryError::Io("broken pipe".to_string()))
        }
    }

    struct PanickingSubscriber;

    #[async_trait]
    impl Subscriber for PanickingSubscriber {
        async fn send(&self, _event: &Event) -> Result<(), DeliveryError> {
            panic!("subscriber bug");
        }
    }

    /// Subscriber that fails every write and panics when closed
    struct PanicOnCloseSubscriber;

    #[async_trait]
    impl Subscriber for PanicOnCloseSubscriber {
        async fn send(&self, _event: &Event) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }

        async fn close(&self) {
            panic!("close bug");
        }
    }

    /// Subscriber that fails every write and never finishes closing
    struct StalledCloseSubscriber;

    #[async_trait]
    impl Subscriber for StalledCloseSubscriber {
        async fn send(&self, _event: &Event) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }

        async fn close(&self) {
            std::future::pending::<()>().await
        }
    }

    fn test_config() -> HubConfig {
        HubConfig {
            write_timeout_ms: 50,
            drain_timeout_ms: 500,
            ..Default::default()
        }
    }

    fn channel() -> (Arc<dyn Subscriber>, mpsc::Receiver<Event>) {
        let (sub, rx) = ChannelSubscriber::new(16);
        (Arc::new(sub), rx)
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.write_timeout(), Duration::from_secs(2));
        assert_eq!(config.drain_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_connections, 0);
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = Hub::new(test_config());
        let (sub, _rx) = channel();

        let id = hub.register(sub).await;
        assert!(!id.is_empty());
        assert!(hub.is_registered(&id).await);
        assert_eq!(hub.connection_count().await, 1);

        hub.unregister(&id).await;
        assert_eq!(hub.connection_count().await, 0);

        // Second unregister and unknown ids are no-ops
        hub.unregister(&id).await;
        hub.unregister("unknown").await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let hub = Hub::new(HubConfig {
            max_connections: 2,
            ..test_config()
        });

        let (a, _ra) = channel();
        let (b, _rb) = channel();
        let (c, _rc) = channel();

        hub.try_register(a).await.unwrap();
        hub.try_register(b).await.unwrap();
        let result = hub.try_register(c).await;

        assert!(matches!(result, Err(HubError::TooManyConnections(2))));
        assert_eq!(hub.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_subscriber_once() {
        let hub = Hub::new(test_config());
        let (a, mut rx_a) = channel();
        let (b, mut rx_b) = channel();
        hub.register(a).await;
        hub.register(b).await;

        let event = Event::new("vote_cast", json!({"id": 7, "votes": 5}));
        hub.shared.fan_out(&event).await;

        assert_eq!(rx_a.try_recv().unwrap(), event);
        assert_eq!(rx_b.try_recv().unwrap(), event);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_subscriber_removed_others_served() {
        let hub = Hub::new(test_config());
        let broken = hub.register(Arc::new(BrokenSubscriber)).await;
        let (healthy, mut rx) = channel();
        let healthy = hub.register(healthy).await;

        let event = Event::new("song_added", json!({"id": 9}));
        hub.shared.fan_out(&event).await;

        assert_eq!(rx.try_recv().unwrap(), event);
        assert!(!hub.is_registered(&broken).await);
        assert!(hub.is_registered(&healthy).await);

        let stats = hub.stats().await;
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed_deliveries, 1);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_times_out() {
        let hub = Hub::new(test_config());
        let stalled = hub.register(Arc::new(StalledSubscriber)).await;
        let (healthy, mut rx) = channel();
        hub.register(healthy).await;

        let event = Event::new("vote_cast", json!(1));
        tokio::time::timeout(Duration::from_secs(2), hub.shared.fan_out(&event))
            .await
            .expect("fan-out bounded by write timeout");

        assert_eq!(rx.try_recv().unwrap(), event);
        assert!(!hub.is_registered(&stalled).await);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_isolated() {
        let hub = Hub::new(test_config());
        let bad = hub.register(Arc::new(PanickingSubscriber)).await;
        let (healthy, mut rx) = channel();
        hub.register(healthy).await;

        let event = Event::new("vote_cast", json!(2));
        hub.shared.fan_out(&event).await;

        assert_eq!(rx.try_recv().unwrap(), event);
        assert!(!hub.is_registered(&bad).await);
    }

    #[tokio::test]
    async fn test_panicking_close_keeps_loop_alive() {
        let hub = Hub::new(test_config());
        let bad = hub.register(Arc::new(PanicOnCloseSubscriber)).await;
        let (healthy, mut rx) = channel();
        hub.register(healthy).await;
        hub.start().unwrap();

        hub.publish(Event::new("vote_cast", json!(1)));
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert_eq!(first.unwrap().unwrap().payload, json!(1));

        hub.publish(Event::new("vote_cast", json!(2)));
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert_eq!(second.unwrap().unwrap().payload, json!(2));

        assert!(!hub.is_registered(&bad).await);
        hub.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_close_during_shutdown() {
        let hub = Hub::new(test_config());
        hub.register(Arc::new(PanicOnCloseSubscriber)).await;
        hub.start().unwrap();

        hub.shutdown().await.unwrap();
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_stalled_closes_cost_one_deadline() {
        let hub = Hub::new(test_config());
        for _ in 0..10 {
            hub.register(Arc::new(StalledCloseSubscriber)).await;
        }
        let (healthy, mut rx) = channel();
        hub.register(healthy).await;

        // Failed writes plus ten stalled closes, 50ms deadline each
        let started = std::time::Instant::now();
        hub.shared.fan_out(&Event::new("vote_cast", json!(1))).await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(300), "fan-out took {:?}", elapsed);
        assert_eq!(rx.try_recv().unwrap().payload, json!(1));
        assert_eq!(hub.connection_count().await, 1);
        assert_eq!(hub.stats().await.failed_deliveries, 10);
    }

    #[tokio::test]
    async fn test_closed_receiver_counts_as_failure() {
        let hub = Hub::new(test_config());
        let (sub, rx) = channel();
        let id = hub.register(sub).await;
        drop(rx);

        hub.shared.fan_out(&Event::new("vote_cast", json!(3))).await;
        assert!(!hub.is_registered(&id).await);
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let hub = Hub::new(test_config());
        hub.start().unwrap();
        assert!(hub.is_running());
        assert!(matches!(hub.start(), Err(HubError::AlreadyStarted)));

        hub.shutdown().await.unwrap();
        assert!(!hub.is_running());
        assert!(matches!(hub.shutdown().await, Err(HubError::Stopped)));
        assert!(matches!(hub.start(), Err(HubError::Stopped)));
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_dropped() {
        let hub = Hub::new(test_config());
        hub.start().unwrap();
        hub.shutdown().await.unwrap();

        hub.publish(Event::new("vote_cast", json!(4)));
        let stats = hub.stats().await;
        assert_eq!(stats.published, 0);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_overflow_counts_drops() {
        let hub = Hub::new(HubConfig {
            queue_capacity: 2,
            ..test_config()
        });

        // Not started, so everything stays queued
        for n in 0..5 {
            hub.publish(Event::new("vote_cast", json!(n)));
        }

        let stats = hub.stats().await;
        assert_eq!(stats.published, 5);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.queued, 2);
    }

    #[tokio::test]
    async fn test_notify_serializes_payload() {
        let hub = Hub::new(test_config());
        let (sub, mut rx) = channel();
        hub.register(sub).await;
        hub.start().unwrap();

        hub.publisher().notify("song_added", &json!({"id": 9}));

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Event::new("song_added", json!({"id": 9})));

        hub.shutdown().await.unwrap();
    }
}
