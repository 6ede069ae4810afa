//! Typed publish/subscribe endpoints.
//!
//! A [`DataBus`] maps topic names (`airspy.iq_data`) to the bounded queues of the
//! sinks connected to them. Producers hold a [`DataSource`] for one topic and
//! publish into every connected queue. Consumers hold a [`DataSink`], connect it
//! to a topic and receive with a timeout.
//!
//! # Backpressure
//!
//! Each connected sink owns a bounded queue (default depth 10). When a queue is
//! full, [`DataSource::publish`] applies the source's [`PublishPolicy`]:
//!
//! - `Block` waits for space, up to the source's block timeout, then drops the
//!   value for that subscriber.
//! - `DropOldest` evicts the oldest queued value and enqueues the new one.
//!
//! [`DataSource::try_publish`] never waits. Under `Block` it drops the newest
//! value instead. It is the only publish path allowed on driver-owned threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default queue depth for a connected sink.
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Behaviour of a publish into a full queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Wait for the consumer to make room.
    #[default]
    Block,
    /// Evict the oldest queued value.
    DropOldest,
}

/// Outcome of one publish across all subscribers of a topic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that received the value.
    pub delivered: usize,
    /// Values lost to full queues (the new value or an evicted one).
    pub dropped: usize,
}

struct Subscription<T> {
    id: u64,
    tx: Sender<T>,
    // kept so the producer can evict under DropOldest
    rx: Receiver<T>,
}

/// Topic registry shared by sources and sinks.
pub struct DataBus<T> {
    topics: Mutex<HashMap<String, Vec<Subscription<T>>>>,
    next_id: AtomicU64,
}

impl<T: Send + 'static> DataBus<T> {
    /// Creates an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Creates a producer endpoint for `topic`.
    pub fn source(
        self: &Arc<Self>,
        topic: impl Into<String>,
        policy: PublishPolicy,
    ) -> DataSource<T> {
        DataSource {
            bus: Arc::clone(self),
            topic: topic.into(),
            policy,
            block_timeout: Duration::from_secs(1),
        }
    }

    /// Creates an unconnected consumer endpoint with the given queue depth.
    pub fn sink(self: &Arc<Self>, depth: usize) -> DataSink<T> {
        let (wake_tx, wake_rx) = bounded(1);
        DataSink {
            bus: Arc::clone(self),
            depth: depth.max(1),
            connection: None,
            wake_tx,
            wake_rx,
        }
    }

    /// Number of sinks currently connected to `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    fn attach(&self, topic: &str, depth: usize) -> (u64, Receiver<T>) {
        let (tx, rx) = bounded(depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Subscription {
                id,
                tx,
                rx: rx.clone(),
            });
        (id, rx)
    }

    fn queues(&self, topic: &str) -> Vec<(Sender<T>, Receiver<T>)> {
        self.topics.lock().get(topic).map_or_else(Vec::new, |subs| {
            subs.iter()
                .map(|sub| (sub.tx.clone(), sub.rx.clone()))
                .collect()
        })
    }
}

impl<T> DataBus<T> {
    fn detach(&self, topic: &str, id: u64) {
        let mut topics = self.topics.lock();
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|sub| sub.id != id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

// =============================================================================
// Source
// =============================================================================

/// Producer endpoint bound to one topic.
pub struct DataSource<T> {
    bus: Arc<DataBus<T>>,
    topic: String,
    policy: PublishPolicy,
    block_timeout: Duration,
}

impl<T> Clone for DataSource<T> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            topic: self.topic.clone(),
            policy: self.policy,
            block_timeout: self.block_timeout,
        }
    }
}

impl<T: Clone + Send + 'static> DataSource<T> {
    /// Sets how long a `Block` publish waits for queue space.
    #[must_use]
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Topic this source publishes on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Full-queue policy of this source.
    #[must_use]
    pub fn policy(&self) -> PublishPolicy {
        self.policy
    }

    /// Publishes to every connected sink, applying the full-queue policy.
    pub fn publish(&self, value: T) -> PublishReport {
        self.fan_out(value, true)
    }

    /// Publishes without ever waiting for queue space.
    pub fn try_publish(&self, value: T) -> PublishReport {
        self.fan_out(value, false)
    }

    fn fan_out(&self, value: T, may_block: bool) -> PublishReport {
        let queues = self.bus.queues(&self.topic);
        let mut report = PublishReport::default();
        let last = queues.len().saturating_sub(1);
        let mut value = Some(value);

        for (index, (tx, rx)) in queues.into_iter().enumerate() {
            let item = if index == last {
                value.take()
            } else {
                value.clone()
            };
            let Some(item) = item else { break };
            self.deliver(&tx, &rx, item, may_block, &mut report);
        }

        if report.dropped > 0 {
            tracing::trace!(topic = %self.topic, dropped = report.dropped, "Queue full");
        }
        report
    }

    fn deliver(
        &self,
        tx: &Sender<T>,
        rx: &Receiver<T>,
        item: T,
        may_block: bool,
        report: &mut PublishReport,
    ) {
        match (self.policy, may_block) {
            (PublishPolicy::Block, true) => match tx.send_timeout(item, self.block_timeout) {
                Ok(()) => report.delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(
                        topic = %self.topic,
                        timeout_ms = self.block_timeout.as_millis() as u64,
                        "Consumer stalled, dropping value"
                    );
                    report.dropped += 1;
                }
                Err(SendTimeoutError::Disconnected(_)) => {}
            },
            (PublishPolicy::Block, false) => match tx.try_send(item) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => report.dropped += 1,
                Err(TrySendError::Disconnected(_)) => {}
            },
            (PublishPolicy::DropOldest, _) => {
                let mut pending = item;
                // another producer may refill the slot we freed, so retry a bounded number of times
                for _ in 0..4 {
                    match tx.try_send(pending) {
                        Ok(()) => {
                            report.delivered += 1;
                            return;
                        }
                        Err(TrySendError::Full(back)) => {
                            if rx.try_recv().is_ok() {
                                report.dropped += 1;
                            }
                            pending = back;
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
                report.dropped += 1;
            }
        }
    }
}

// =============================================================================
// Sink
// =============================================================================

struct Connection<T> {
    topic: String,
    id: u64,
    rx: Receiver<T>,
}

/// Consumer endpoint with a bounded queue.
///
/// `connect` and `disconnect` are idempotent. Receiving happens either directly
/// through [`DataSink::timed_receive`] or through a [`SinkReader`] handed to an
/// acquisition thread.
pub struct DataSink<T> {
    bus: Arc<DataBus<T>>,
    depth: usize,
    connection: Option<Connection<T>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl<T: Send + 'static> DataSink<T> {
    /// Connects to `topic`. Reconnecting to the current topic is a no-op; a
    /// different topic replaces the current connection.
    pub fn connect(&mut self, topic: &str) {
        if let Some(conn) = &self.connection {
            if conn.topic == topic {
                return;
            }
            self.disconnect();
        }
        let (id, rx) = self.bus.attach(topic, self.depth);
        tracing::debug!(topic, depth = self.depth, "Sink connected");
        self.connection = Some(Connection {
            topic: topic.to_string(),
            id,
            rx,
        });
    }

    /// True while attached to a topic.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Topic of the current connection.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.connection.as_ref().map(|conn| conn.topic.as_str())
    }

    /// Queue depth used for connections.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Waits up to `timeout` for a value. Returns `None` on timeout, on wake-up
    /// or when not connected; nothing is consumed in those cases.
    pub fn timed_receive(&self, timeout: Duration) -> Option<T> {
        self.reader()?.timed_receive(timeout)
    }

    /// Receive handle for the current connection, for use on another thread.
    ///
    /// Any pending wake-up is cleared so the new reader starts clean.
    pub fn reader(&self) -> Option<SinkReader<T>> {
        let conn = self.connection.as_ref()?;
        while self.wake_rx.try_recv().is_ok() {}
        Some(SinkReader {
            rx: conn.rx.clone(),
            wake: self.wake_rx.clone(),
        })
    }
}

impl<T> DataSink<T> {
    /// Detaches from the current topic. Queued values are discarded.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.bus.detach(&conn.topic, conn.id);
            tracing::debug!(topic = %conn.topic, "Sink disconnected");
        }
    }

    /// Handle that interrupts a blocked [`SinkReader::timed_receive`].
    #[must_use]
    pub fn waker(&self) -> SinkWaker {
        SinkWaker {
            tx: self.wake_tx.clone(),
        }
    }
}

impl<T> Drop for DataSink<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Receive side of a connected sink, movable to a worker thread.
pub struct SinkReader<T> {
    rx: Receiver<T>,
    wake: Receiver<()>,
}

impl<T> SinkReader<T> {
    /// Waits up to `timeout` for a value; a wake-up ends the wait early.
    pub fn timed_receive(&self, timeout: Duration) -> Option<T> {
        select! {
            recv(self.rx) -> msg => match msg {
                Ok(value) => Some(value),
                // all senders gone: park on the wake channel instead of spinning
                Err(_) => {
                    let _ = self.wake.recv_timeout(timeout);
                    None
                }
            },
            recv(self.wake) -> _ => None,
            default(timeout) => None,
        }
    }
}

/// Interrupts a blocked receive so a stopping thread notices its run flag.
#[derive(Clone)]
pub struct SinkWaker {
    tx: Sender<()>,
}

impl SinkWaker {
    /// Wakes the reader once. Extra wake-ups before it runs are coalesced.
    pub fn wake(&self) {
        let _ = self.tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn delivers_in_order() {
        let bus = DataBus::<u32>::new();
        let source = bus.source("airspy.iq_data", PublishPolicy::Block);
        let mut sink = bus.sink(DEFAULT_QUEUE_DEPTH);
        sink.connect("airspy.iq_data");

        for i in 0..5 {
            assert_eq!(source.publish(i).delivered, 1);
        }
        let received: Vec<u32> = (0..5).filter_map(|_| sink.timed_receive(SHORT)).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn timed_receive_times_out_without_consuming() {
        let bus = DataBus::<u32>::new();
        let mut sink = bus.sink(2);
        sink.connect("t");

        let started = Instant::now();
        assert_eq!(sink.timed_receive(SHORT), None);
        assert!(started.elapsed() >= SHORT);
    }

    #[test]
    fn unconnected_sink_receives_nothing() {
        let bus = DataBus::<u32>::new();
        let source = bus.source("t", PublishPolicy::Block);
        let sink = bus.sink(2);
        assert_eq!(source.publish(1), PublishReport::default());
        assert_eq!(sink.timed_receive(SHORT), None);
    }

    #[test]
    fn connect_and_disconnect_are_idempotent() {
        let bus = DataBus::<u32>::new();
        let mut sink = bus.sink(2);
        sink.connect("t");
        sink.connect("t");
        assert_eq!(bus.subscriber_count("t"), 1);

        sink.disconnect();
        sink.disconnect();
        assert_eq!(bus.subscriber_count("t"), 0);
        assert!(!sink.is_connected());
    }

    #[test]
    fn reconnect_moves_topic() {
        let bus = DataBus::<u32>::new();
        let mut sink = bus.sink(2);
        sink.connect("a");
        sink.connect("b");
        assert_eq!(bus.subscriber_count("a"), 0);
        assert_eq!(bus.subscriber_count("b"), 1);
        assert_eq!(sink.topic(), Some("b"));
    }

    #[test]
    fn fans_out_to_every_subscriber() {
        let bus = DataBus::<String>::new();
        let source = bus.source("t", PublishPolicy::Block);
        let mut first = bus.sink(2);
        let mut second = bus.sink(2);
        first.connect("t");
        second.connect("t");

        let report = source.publish("x".to_string());
        assert_eq!(report.delivered, 2);
        assert_eq!(first.timed_receive(SHORT).as_deref(), Some("x"));
        assert_eq!(second.timed_receive(SHORT).as_deref(), Some("x"));
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let bus = DataBus::<u32>::new();
        let source = bus.source("t", PublishPolicy::DropOldest);
        let mut sink = bus.sink(2);
        sink.connect("t");

        source.publish(1);
        source.publish(2);
        let report = source.publish(3);
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });

        assert_eq!(sink.timed_receive(SHORT), Some(2));
        assert_eq!(sink.timed_receive(SHORT), Some(3));
    }

    #[test]
    fn try_publish_under_block_drops_newest() {
        let bus = DataBus::<u32>::new();
        let source = bus.source("t", PublishPolicy::Block);
        let mut sink = bus.sink(1);
        sink.connect("t");

        assert_eq!(source.try_publish(1).delivered, 1);
        assert_eq!(source.try_publish(2), PublishReport { delivered: 0, dropped: 1 });
        assert_eq!(sink.timed_receive(SHORT), Some(1));
        assert_eq!(sink.timed_receive(SHORT), None);
    }

    #[test]
    fn blocking_publish_waits_for_consumer() {
        let bus = DataBus::<u32>::new();
        let source = bus.source("t", PublishPolicy::Block);
        let mut sink = bus.sink(1);
        sink.connect("t");
        source.publish(1);

        let reader = sink.reader().unwrap();
        let consumer = thread::spawn(move || {
            thread::sleep(SHORT);
            let first = reader.timed_receive(Duration::from_secs(1));
            let second = reader.timed_receive(Duration::from_secs(1));
            (first, second)
        });

        assert_eq!(source.publish(2).delivered, 1);
        assert_eq!(consumer.join().unwrap(), (Some(1), Some(2)));
    }

    #[test]
    fn blocking_publish_is_bounded() {
        let bus = DataBus::<u32>::new();
        let source = bus.source("t", PublishPolicy::Block).with_block_timeout(SHORT);
        let mut sink = bus.sink(1);
        sink.connect("t");
        source.publish(1);

        assert_eq!(source.publish(2), PublishReport { delivered: 0, dropped: 1 });
    }

    #[test]
    fn waker_interrupts_blocked_reader() {
        let bus = DataBus::<u32>::new();
        let mut sink = bus.sink(2);
        sink.connect("t");
        let reader = sink.reader().unwrap();
        let waker = sink.waker();

        let started = Instant::now();
        let handle = thread::spawn(move || reader.timed_receive(Duration::from_secs(10)));
        thread::sleep(SHORT);
        waker.wake();
        assert_eq!(handle.join().unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn dropping_sink_detaches() {
        let bus = DataBus::<u32>::new();
        {
            let mut sink = bus.sink(2);
            sink.connect("t");
            assert_eq!(bus.subscriber_count("t"), 1);
        }
        assert_eq!(bus.subscriber_count("t"), 0);
    }
}
