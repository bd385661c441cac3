//! In-process broker.
//!
//! Keeps one append-only log per topic and one cursor per consumer group,
//! which gives the same fan-out as the AMQP topology: every group reads every
//! message, members of one group share the cursor. A group that joins late
//! starts from the beginning of the log.
//!
//! Used by the test suite and for single-process runs without RabbitMQ.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;

use super::{Broker, Closeable, Delivery, PublishChannel, Subscription};
use crate::error::BrokerError;

/// Counters describing resource usage, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub publishers_opened: u64,
    pub publishers_closed: u64,
    pub subscriptions_opened: u64,
    pub subscriptions_closed: u64,
    pub published: u64,
    pub acked: u64,
}

#[derive(Default)]
struct TopicLog {
    messages: Vec<Vec<u8>>,
    cursors: HashMap<String, usize>,
}

#[derive(Default)]
struct Counters {
    publishers_opened: AtomicU64,
    publishers_closed: AtomicU64,
    subscriptions_opened: AtomicU64,
    subscriptions_closed: AtomicU64,
    published: AtomicU64,
    acked: AtomicU64,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, TopicLog>>,
    notify: Notify,
    counters: Counters,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
}

impl Inner {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-process broker handle. Clones share the same topics.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every new connection attempt fail, as if the broker were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.fail_connect.store(unreachable, Ordering::SeqCst);
    }

    /// Make publishes fail after the connection is opened.
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> BrokerStats {
        let c = &self.inner.counters;
        BrokerStats {
            publishers_opened: c.publishers_opened.load(Ordering::SeqCst),
            publishers_closed: c.publishers_closed.load(Ordering::SeqCst),
            subscriptions_opened: c.subscriptions_opened.load(Ordering::SeqCst),
            subscriptions_closed: c.subscriptions_closed.load(Ordering::SeqCst),
            published: c.published.load(Ordering::SeqCst),
            acked: c.acked.load(Ordering::SeqCst),
        }
    }

    /// Append raw bytes to a topic, bypassing any producer.
    pub fn inject(&self, topic: &str, body: impl Into<Vec<u8>>) {
        self.inner
            .topics()
            .entry(topic.to_string())
            .or_default()
            .messages
            .push(body.into());
        self.inner.notify.notify_waiters();
    }

    /// Raw bodies stored on a topic, in publish order.
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .topics()
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Decoded payloads stored on a topic. Bodies that don't decode are skipped.
    pub fn published<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.messages(topic)
            .iter()
            .filter_map(|body| serde_json::from_slice(body).ok())
            .collect()
    }

    fn check_reachable(&self) -> Result<(), BrokerError> {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(BrokerError::Connect("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_publisher(&self, topic: &str) -> Result<Box<dyn PublishChannel>, BrokerError> {
        self.check_reachable()?;
        self.inner
            .counters
            .publishers_opened
            .fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryPublisher {
            topic: topic.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        self.check_reachable().map_err(|e| BrokerError::Subscribe {
            topic: topic.to_string(),
            group: group.to_string(),
            reason: e.to_string(),
        })?;

        self.inner
            .topics()
            .entry(topic.to_string())
            .or_default()
            .cursors
            .entry(group.to_string())
            .or_insert(0);

        self.inner
            .counters
            .subscriptions_opened
            .fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            group: group.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryPublisher {
    topic: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl PublishChannel for MemoryPublisher {
    async fn publish(&mut self, body: &[u8]) -> Result<(), BrokerError> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("request timed out".to_string()));
        }

        self.inner
            .topics()
            .entry(self.topic.clone())
            .or_default()
            .messages
            .push(body.to_vec());
        self.inner.counters.published.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Closeable for MemoryPublisher {
    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        self.inner
            .counters
            .publishers_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySubscription {
    topic: String,
    group: String,
    inner: Arc<Inner>,
}

impl MemorySubscription {
    fn try_pull(&self) -> Option<Delivery> {
        let mut topics = self.inner.topics();
        let log = topics.get_mut(&self.topic)?;
        let cursor = log.cursors.entry(self.group.clone()).or_insert(0);
        let body = log.messages.get(*cursor)?.clone();
        let tag = *cursor as u64;
        *cursor += 1;

        Some(Delivery {
            topic: self.topic.clone(),
            tag,
            key: None,
            payload: (!body.is_empty()).then_some(body),
        })
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_pull() {
                return Some(Ok(delivery));
            }

            notified.await;
        }
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<(), BrokerError> {
        self.inner.counters.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Closeable for MemorySubscription {
    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        self.inner
            .counters
            .subscriptions_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
