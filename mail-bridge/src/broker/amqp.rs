//! RabbitMQ transport using lapin.
//!
//! Topology:
//!
//! ```text
//! producer → exchange <topic> (fanout) → queue <topic>.<group> → consumers of <group>
//! ```
//!
//! Every group gets its own durable queue, so each group sees each message
//! independently while members of one group compete for it.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tracing::{info, warn};

use super::{Broker, Closeable, Delivery, PublishChannel, Subscription};
use crate::error::BrokerError;

static CONSUMER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Queue name backing a consumer group on a topic.
pub fn group_queue(topic: &str, group: &str) -> String {
    format!("{topic}.{group}")
}

/// AMQP broker factory. Holds only the URL; every resource opens its own connection.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    url: String,
    prefetch_count: u16,
}

impl AmqpBroker {
    pub fn new(url: impl Into<String>, prefetch_count: u16) -> Self {
        Self {
            url: url.into(),
            prefetch_count,
        }
    }

    async fn connect(&self) -> Result<(Connection, Channel), BrokerError> {
        let conn = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connect(format!("failed to create channel: {e}")))?;

        Ok((conn, channel))
    }
}

async fn declare_topic(channel: &Channel, topic: &str) -> Result<(), BrokerError> {
    channel
        .exchange_declare(
            topic,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Topology {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
}

async fn shutdown(channel: Channel, conn: Connection, what: &str) -> Result<(), BrokerError> {
    let channel_result = channel.close(200, "Normal shutdown").await;
    if let Err(e) = &channel_result {
        warn!(resource = what, error = %e, "rabbitmq_channel_close_error");
    }

    conn.close(200, "Normal shutdown")
        .await
        .map_err(|e| BrokerError::Close(format!("{what}: {e}")))?;

    channel_result.map_err(|e| BrokerError::Close(format!("{what}: {e}")))
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn open_publisher(&self, topic: &str) -> Result<Box<dyn PublishChannel>, BrokerError> {
        let (conn, channel) = self.connect().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connect(format!("failed to enable confirms: {e}")))?;

        declare_topic(&channel, topic).await?;

        Ok(Box::new(AmqpPublisher {
            topic: topic.to_string(),
            conn,
            channel,
        }))
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let subscribe_err = |reason: String| BrokerError::Subscribe {
            topic: topic.to_string(),
            group: group.to_string(),
            reason,
        };

        let (conn, channel) = self.connect().await?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| subscribe_err(format!("failed to set QoS: {e}")))?;

        declare_topic(&channel, topic).await?;

        let queue = group_queue(topic, group);
        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| subscribe_err(format!("failed to declare queue: {e}")))?;

        channel
            .queue_bind(&queue, topic, "", QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| subscribe_err(format!("failed to bind queue: {e}")))?;

        let consumer_tag = format!(
            "{group}-{}-{}",
            std::process::id(),
            CONSUMER_SEQ.fetch_add(1, Ordering::Relaxed)
        );

        let consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| subscribe_err(format!("failed to start consumer: {e}")))?;

        info!(
            topic = %topic,
            group = %group,
            queue = %queue,
            prefetch_count = self.prefetch_count,
            "rabbitmq_consumer_registered"
        );

        Ok(Box::new(AmqpSubscription {
            topic: topic.to_string(),
            consumer_tag,
            conn,
            channel,
            consumer,
        }))
    }
}

struct AmqpPublisher {
    topic: String,
    conn: Connection,
    channel: Channel,
}

#[async_trait]
impl PublishChannel for AmqpPublisher {
    async fn publish(&mut self, body: &[u8]) -> Result<(), BrokerError> {
        let confirmation = self
            .channel
            .basic_publish(
                &self.topic,
                "",
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(format!("failed to confirm publish: {e}")))?;

        if confirmation.is_nack() {
            return Err(BrokerError::Rejected);
        }

        Ok(())
    }
}

#[async_trait]
impl Closeable for AmqpPublisher {
    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        let this = *self;
        shutdown(this.channel, this.conn, "publisher").await
    }
}

struct AmqpSubscription {
    topic: String,
    consumer_tag: String,
    conn: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let delivery = self.consumer.next().await?;

        Some(
            delivery
                .map(|d| Delivery {
                    topic: self.topic.clone(),
                    tag: d.delivery_tag,
                    key: d.properties.message_id().as_ref().map(|s| s.to_string()),
                    payload: (!d.data.is_empty()).then_some(d.data),
                })
                .map_err(|e| BrokerError::Delivery(e.to_string())),
        )
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery.tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack {
                tag: delivery.tag,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Closeable for AmqpSubscription {
    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        let this = *self;

        if let Err(e) = this
            .channel
            .basic_cancel(&this.consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(consumer_tag = %this.consumer_tag, error = %e, "rabbitmq_cancel_error");
        }

        shutdown(this.channel, this.conn, "subscription").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_queue_name() {
        assert_eq!(group_queue("send_mail", "EmailGroupID"), "send_mail.EmailGroupID");
    }

    #[test]
    fn test_broker_creation() {
        let broker = AmqpBroker::new("amqp://localhost:5672", 10);
        assert_eq!(broker.prefetch_count, 10);
    }
}
