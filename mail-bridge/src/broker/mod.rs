//! Broker transport abstraction.
//!
//! The bridge talks to the broker through two short-lived resources:
//! - [`PublishChannel`]: one connection used for a single publish
//! - [`Subscription`]: one consumer bound to a topic and a consumer group
//!
//! ## Transports
//!
//! - [`AmqpBroker`]: RabbitMQ via lapin. Topics are durable fanout exchanges and
//!   each consumer group is a durable queue `<topic>.<group>` bound to its topic.
//! - [`MemoryBroker`]: in-process transport with the same group semantics.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::BrokerError;

pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

/// One message pulled from a subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub tag: u64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
}

/// A broker resource that must be released explicitly.
#[async_trait]
pub trait Closeable: Send {
    async fn close(self: Box<Self>) -> Result<(), BrokerError>;
}

/// A connection opened for publishing to one topic.
#[async_trait]
pub trait PublishChannel: Closeable {
    /// Publish and wait until the broker confirms the write.
    async fn publish(&mut self, body: &[u8]) -> Result<(), BrokerError>;
}

/// A consumer bound to one topic under one consumer group.
#[async_trait]
pub trait Subscription: Closeable {
    /// Wait for the next delivery. `None` means the broker closed the stream.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}

/// Factory for broker resources.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn open_publisher(&self, topic: &str) -> Result<Box<dyn PublishChannel>, BrokerError>;

    /// Join `group` on `topic`; returns once the broker has registered the consumer.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// Owns a broker resource and guarantees it is closed exactly once.
///
/// `close` releases it on the normal path. If the owner is dropped first
/// (e.g. the task was cancelled mid-await), the close is scheduled on the
/// current runtime instead.
pub struct ScopedResource<T: ?Sized + Closeable + 'static> {
    label: String,
    inner: Option<Box<T>>,
}

impl<T: ?Sized + Closeable + 'static> ScopedResource<T> {
    pub fn new(label: impl Into<String>, inner: Box<T>) -> Self {
        Self {
            label: label.into(),
            inner: Some(inner),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("resource used after close"))
    }

    pub async fn close(mut self) -> Result<(), BrokerError> {
        match self.inner.take() {
            Some(inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

impl<T: ?Sized + Closeable + 'static> Drop for ScopedResource<T> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        let label = std::mem::take(&mut self.label);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(resource = %label, "broker_resource_deferred_close");
                handle.spawn(async move {
                    if let Err(e) = inner.close().await {
                        warn!(resource = %label, error = %e, "broker_resource_close_failed");
                    }
                });
            }
            Err(_) => {
                warn!(resource = %label, "broker_resource_leaked_without_runtime");
            }
        }
    }
}
