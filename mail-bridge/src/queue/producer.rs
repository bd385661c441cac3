//! Single-topic producer.
//!
//! Every `send` opens its own broker connection, publishes one envelope,
//! waits for the broker confirm and closes the connection again. Nothing is
//! pooled between calls, so a long-lived process never holds a stale channel.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::broker::{Broker, ScopedResource};
use crate::error::MessagingFailure;
use crate::queue::codec;

/// Producer bound to one topic.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    topic: String,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a payload to the bound topic.
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), MessagingFailure> {
        self.send_to(None, payload).await
    }

    /// Publish a payload, optionally to a different topic than the bound one.
    ///
    /// Returns only after the broker has confirmed the write. Any failure is
    /// logged and returned as a [`MessagingFailure`]; there is no retry.
    pub async fn send_to<T: Serialize + ?Sized>(
        &self,
        topic_override: Option<&str>,
        payload: &T,
    ) -> Result<(), MessagingFailure> {
        let topic = topic_override.unwrap_or(&self.topic);

        let result = self.publish(topic, payload).await;
        if let Err(e) = &result {
            error!(topic = %topic, error = %e.reason, "producer_send_failed");
        }
        result
    }

    async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
    ) -> Result<(), MessagingFailure> {
        let body = codec::encode(payload).map_err(|e| MessagingFailure::new(topic, e))?;

        let channel = self
            .broker
            .open_publisher(topic)
            .await
            .map_err(|e| MessagingFailure::new(topic, e))?;
        let mut channel = ScopedResource::new(format!("publisher:{topic}"), channel);

        let published = channel.get_mut().publish(&body).await;
        let closed = channel.close().await;

        published.map_err(|e| MessagingFailure::new(topic, e))?;
        if let Err(e) = closed {
            // The write was confirmed; a failed close only leaks on the broker side.
            warn!(topic = %topic, error = %e, "producer_close_failed");
        }

        info!(topic = %topic, body_length = body.len(), "producer_message_published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::queue::types::{EmailRequest, Status};

    fn request() -> EmailRequest {
        EmailRequest {
            id: Some(1),
            subject: "Hi".to_string(),
            from_email: "a@x.com".to_string(),
            to_email: "b@x.com".to_string(),
            message_body: Some("hello".to_string()),
            status: Status::Pending,
        }
    }

    #[tokio::test]
    async fn test_send_opens_and_closes_per_call() {
        let broker = MemoryBroker::new();
        let producer = Producer::new(Arc::new(broker.clone()), "send_mail");

        producer.send(&request()).await.unwrap();
        producer.send(&request()).await.unwrap();

        let stats = broker.stats();
        assert_eq!(stats.publishers_opened, 2);
        assert_eq!(stats.publishers_closed, 2);
        assert_eq!(broker.published::<EmailRequest>("send_mail"), vec![request(), request()]);
    }

    #[tokio::test]
    async fn test_topic_override() {
        let broker = MemoryBroker::new();
        let producer = Producer::new(Arc::new(broker.clone()), "send_mail");

        producer.send_to(Some("other"), &request()).await.unwrap();

        assert_eq!(producer.topic(), "send_mail");
        assert!(broker.messages("send_mail").is_empty());
        assert_eq!(broker.messages("other").len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_still_releases_connection() {
        let broker = MemoryBroker::new();
        broker.set_fail_publish(true);
        let producer = Producer::new(Arc::new(broker.clone()), "send_mail");

        let err = producer.send(&request()).await.unwrap_err();
        assert_eq!(err.topic, "send_mail");
        assert!(err.reason.contains("timed out"));

        let stats = broker.stats();
        assert_eq!(stats.publishers_opened, 1);
        assert_eq!(stats.publishers_closed, 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_messaging_failure() {
        let broker = MemoryBroker::new();
        broker.set_unreachable(true);
        let producer = Producer::new(Arc::new(broker.clone()), "send_csv");

        let err = producer.send(&request()).await.unwrap_err();
        assert_eq!(err.topic, "send_csv");
        assert_eq!(broker.stats().publishers_opened, 0);
    }
}
