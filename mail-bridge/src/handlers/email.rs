//! Single email handler.
//!
//! Decodes an [`EmailRequest`], sends it, and publishes exactly one
//! [`EmailStatusReport`] whatever the delivery outcome.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{deliver, MessageHandler};
use crate::error::HandlerError;
use crate::mail::{MailSender, TemplateRenderer};
use crate::queue::{codec, EmailRequest, EmailStatusReport, Producer};

pub struct EmailSendHandler {
    renderer: Arc<TemplateRenderer>,
    mailer: Arc<dyn MailSender>,
    reports: Producer,
}

impl EmailSendHandler {
    pub fn new(renderer: Arc<TemplateRenderer>, mailer: Arc<dyn MailSender>, reports: Producer) -> Self {
        Self {
            renderer,
            mailer,
            reports,
        }
    }
}

#[async_trait]
impl MessageHandler for EmailSendHandler {
    async fn process_message(&self, raw: &str) -> Result<(), HandlerError> {
        let request: EmailRequest = codec::decode(raw)?;

        info!(
            id = ?request.id,
            to = %request.to_email,
            mailer = self.mailer.name(),
            "email_send_started"
        );

        let report = match deliver(&self.renderer, self.mailer.as_ref(), &request).await {
            Ok(()) => EmailStatusReport::success(request),
            Err(e) => {
                warn!(
                    id = ?request.id,
                    to = %request.to_email,
                    error = %e,
                    "email_send_failed"
                );
                EmailStatusReport::failure(request, e)
            }
        };

        self.reports.send(&report).await?;

        info!(
            id = ?report.id,
            status = %report.status,
            topic = self.reports.topic(),
            "email_status_reported"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email_send"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::mail::MemoryMailer;
    use crate::queue::{Status, RECEIVE_MAIL_TOPIC};

    const REQUEST: &str = r#"{"id":3,"subject":"Hi","from_email":"a@x.com","to_email":"b@x.com","message_body":"hello","status":"pending"}"#;

    fn handler(broker: &MemoryBroker, mailer: Arc<MemoryMailer>) -> EmailSendHandler {
        let renderer = Arc::new(TemplateRenderer::with_default_template("Header").unwrap());
        let reports = Producer::new(Arc::new(broker.clone()), RECEIVE_MAIL_TOPIC);
        EmailSendHandler::new(renderer, mailer, reports)
    }

    #[tokio::test]
    async fn test_sends_and_reports_success() {
        let broker = MemoryBroker::new();
        let mailer = Arc::new(MemoryMailer::new());
        let handler = handler(&broker, mailer.clone());

        handler.process_message(REQUEST).await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Hi");
        assert_eq!(sent[0].to_email, "b@x.com");
        assert!(sent[0].html_body.contains("hello"));

        let reports: Vec<EmailStatusReport> = broker.published(RECEIVE_MAIL_TOPIC);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, Some(3));
        assert_eq!(reports[0].status, Status::Success);
        assert_eq!(reports[0].status_message.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_reported() {
        let broker = MemoryBroker::new();
        let mailer = Arc::new(MemoryMailer::new());
        mailer.fail_for("b@x.com");
        let handler = handler(&broker, mailer.clone());

        handler.process_message(REQUEST).await.unwrap();

        assert!(mailer.sent().is_empty());
        let reports: Vec<EmailStatusReport> = broker.published(RECEIVE_MAIL_TOPIC);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, Status::Error);
        assert!(reports[0]
            .status_message
            .as_deref()
            .unwrap()
            .contains("rejected"));
    }

    #[tokio::test]
    async fn test_request_without_id_or_body() {
        let broker = MemoryBroker::new();
        let mailer = Arc::new(MemoryMailer::new());
        let handler = handler(&broker, mailer);

        let raw = r#"{"subject":"Hi","from_email":"a@x.com","to_email":"b@x.com"}"#;
        handler.process_message(raw).await.unwrap();

        let reports: Vec<EmailStatusReport> = broker.published(RECEIVE_MAIL_TOPIC);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, None);
        assert_eq!(reports[0].message_body, None);
        assert_eq!(reports[0].status, Status::Success);
    }

    #[tokio::test]
    async fn test_duplicate_requests_produce_two_reports() {
        let broker = MemoryBroker::new();
        let mailer = Arc::new(MemoryMailer::new());
        let handler = handler(&broker, mailer.clone());

        handler.process_message(REQUEST).await.unwrap();
        handler.process_message(REQUEST).await.unwrap();

        assert_eq!(mailer.sent().len(), 2);
        let reports: Vec<EmailStatusReport> = broker.published(RECEIVE_MAIL_TOPIC);
        assert_eq!(reports.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_decode_error() {
        let broker = MemoryBroker::new();
        let mailer = Arc::new(MemoryMailer::new());
        let handler = handler(&broker, mailer.clone());

        let err = handler.process_message("{not json").await.unwrap_err();
        assert!(matches!(err, HandlerError::Decode(_)));
        assert!(mailer.sent().is_empty());
        assert!(broker.messages(RECEIVE_MAIL_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_report_publish_failure_is_returned() {
        let broker = MemoryBroker::new();
        broker.set_fail_publish(true);
        let mailer = Arc::new(MemoryMailer::new());
        let handler = handler(&broker, mailer.clone());

        let err = handler.process_message(REQUEST).await.unwrap_err();
        assert!(matches!(err, HandlerError::Messaging(_)));
        assert_eq!(mailer.sent().len(), 1);
    }
}
