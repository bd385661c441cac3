//! Mail capability: template rendering and delivery.
//!
//! - `template`: Handlebars HTML body plus a fixed plain-text alternative
//! - `smtp`: lettre-based sender (`maildev` or authenticated `smtp`)
//! - [`MemoryMailer`]: records sends in memory, for tests

pub mod smtp;
pub mod template;

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use lettre::message::Mailbox;

use crate::error::DeliveryFailure;

pub use smtp::SmtpMailer;
pub use template::TemplateRenderer;

/// A fully rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub from_email: String,
    pub to_email: String,
    pub html_body: String,
    pub text_body: String,
}

/// Delivers rendered emails. SMTP and dev-mail implementations are interchangeable.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, email: &RenderedEmail) -> Result<(), DeliveryFailure>;

    /// Sender name for logging.
    fn name(&self) -> &'static str;
}

/// Parse an address into a mailbox, naming the field on failure.
pub fn parse_mailbox(field: &'static str, value: &str) -> Result<Mailbox, DeliveryFailure> {
    value
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| DeliveryFailure::Address {
            field,
            reason: format!("{value}: {e}"),
        })
}

/// In-memory sender that records every email it is given.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<RenderedEmail>>,
    failing_recipients: Mutex<HashSet<String>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to `to_email` fail with a transport error.
    pub fn fail_for(&self, to_email: impl Into<String>) {
        self.failing_recipients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(to_email.into());
    }

    pub fn sent(&self) -> Vec<RenderedEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MailSender for MemoryMailer {
    async fn send(&self, email: &RenderedEmail) -> Result<(), DeliveryFailure> {
        let failing = self
            .failing_recipients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&email.to_email);
        if failing {
            return Err(DeliveryFailure::Transport(format!(
                "recipient {} rejected",
                email.to_email
            )));
        }

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mailbox() {
        assert!(parse_mailbox("to_email", "b@x.com").is_ok());
        let err = parse_mailbox("to_email", "not-an-address").unwrap_err();
        assert!(err.to_string().starts_with("invalid to_email address"));
    }

    #[tokio::test]
    async fn test_memory_mailer_failing_recipient() {
        let mailer = MemoryMailer::new();
        mailer.fail_for("bad@x.com");

        let mut email = RenderedEmail {
            subject: "Hi".into(),
            from_email: "a@x.com".into(),
            to_email: "bad@x.com".into(),
            html_body: String::new(),
            text_body: String::new(),
        };
        assert!(mailer.send(&email).await.is_err());

        email.to_email = "good@x.com".into();
        mailer.send(&email).await.unwrap();
        assert_eq!(mailer.sent().len(), 1);
    }
}
