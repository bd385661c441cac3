//! Consumer loop.
//!
//! A `MessageConsumer` is bound to one topic and one consumer group. Its
//! `run` loop subscribes, then pulls messages until shutdown, handing each
//! payload to a [`MessageHandler`]. Failures of a single message (bad UTF-8,
//! bad JSON, handler error, handler panic) are logged and the message is
//! acknowledged anyway: the loop itself never dies from a payload.
//!
//! State machine:
//!
//! ```text
//! NotStarted → Running ⇄ Dispatching → Stopping → Stopped
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::broker::{Broker, Delivery, ScopedResource, Subscription};
use crate::error::{BrokerError, HandlerError};
use crate::handlers::MessageHandler;
use crate::queue::codec;

/// Lifecycle of a consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    NotStarted,
    Running,
    Dispatching,
    Stopping,
    Stopped,
}

/// Consumer bound to one topic under one consumer group.
pub struct MessageConsumer {
    broker: Arc<dyn Broker>,
    topic: String,
    group: String,
    state: watch::Sender<ConsumerState>,
}

impl MessageConsumer {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>, group: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConsumerState::NotStarted);
        Self {
            broker,
            topic: topic.into(),
            group: group.into(),
            state,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Returns an error only if the initial subscription fails. The
    /// subscription is closed exactly once however the loop exits.
    pub async fn run(
        &self,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        info!(
            topic = %self.topic,
            group = %self.group,
            handler = handler.name(),
            "consumer_starting"
        );

        let subscription = match self.broker.subscribe(&self.topic, &self.group).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(topic = %self.topic, group = %self.group, error = %e, "consumer_subscribe_failed");
                self.set_state(ConsumerState::Stopped);
                return Err(e);
            }
        };
        let mut subscription = ScopedResource::new(
            format!("subscription:{}/{}", self.topic, self.group),
            subscription,
        );

        self.set_state(ConsumerState::Running);
        info!(topic = %self.topic, group = %self.group, "consumer_started");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!(topic = %self.topic, "consumer_stopping");
                    break;
                }
                delivery = subscription.get_mut().next_delivery() => delivery,
            };

            match delivery {
                Some(Ok(delivery)) => {
                    self.dispatch(handler.as_ref(), subscription.get_mut(), delivery)
                        .await;
                }
                Some(Err(e)) => {
                    error!(topic = %self.topic, error = %e, "consumer_delivery_error");
                }
                None => {
                    warn!(topic = %self.topic, "consumer_stream_closed");
                    break;
                }
            }
        }

        self.set_state(ConsumerState::Stopping);
        if let Err(e) = subscription.close().await {
            warn!(topic = %self.topic, error = %e, "consumer_close_failed");
        }
        self.set_state(ConsumerState::Stopped);
        info!(topic = %self.topic, group = %self.group, "consumer_stopped");

        Ok(())
    }

    async fn dispatch(
        &self,
        handler: &dyn MessageHandler,
        subscription: &mut dyn Subscription,
        delivery: Delivery,
    ) {
        self.set_state(ConsumerState::Dispatching);

        info!(
            topic = %self.topic,
            delivery_tag = delivery.tag,
            key = ?delivery.key,
            body_length = delivery.payload.as_ref().map(Vec::len).unwrap_or(0),
            "consumer_message_received"
        );

        match delivery.payload.as_deref() {
            Some(body) => match process(handler, body).await {
                Ok(()) => {
                    info!(
                        topic = %self.topic,
                        delivery_tag = delivery.tag,
                        handler = handler.name(),
                        "consumer_message_processed"
                    );
                }
                Err(reason) => {
                    // No redelivery and no dead-letter: the message is gone.
                    error!(
                        topic = %self.topic,
                        delivery_tag = delivery.tag,
                        handler = handler.name(),
                        error = %reason,
                        body_preview = %String::from_utf8_lossy(&body[..body.len().min(500)]),
                        "consumer_message_dropped"
                    );
                }
            },
            None => {
                warn!(topic = %self.topic, delivery_tag = delivery.tag, "consumer_empty_message");
            }
        }

        if let Err(e) = subscription.ack(&delivery).await {
            error!(topic = %self.topic, delivery_tag = delivery.tag, error = %e, "consumer_ack_failed");
        }

        self.set_state(ConsumerState::Running);
    }
}

/// Decode and hand the payload to the handler, turning panics into errors.
async fn process(handler: &dyn MessageHandler, body: &[u8]) -> Result<(), String> {
    let raw = codec::decode_text(body).map_err(|e| HandlerError::from(e).to_string())?;

    match AssertUnwindSafe(handler.process_message(raw)).catch_unwind().await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
