//! SMTP sender using lettre.
//!
//! Two modes:
//! - `maildev`: plain SMTP, no auth, for local MailDev/Mailpit
//! - `smtp`: STARTTLS relay with credentials and a connect timeout

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::MultiPart, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use tracing::{error, info};

use super::{parse_mailbox, MailSender, RenderedEmail};
use crate::config::{SmtpMode, SmtpSettings};
use crate::error::{ConfigError, DeliveryFailure};

/// SMTP-backed [`MailSender`].
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    mode: SmtpMode,
    host: String,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, ConfigError> {
        let timeout = Some(Duration::from_secs(settings.timeout_secs));

        let (transport, host) = match settings.mode {
            SmtpMode::MailDev => {
                let transport =
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.maildev_host)
                        .port(settings.maildev_port)
                        .timeout(timeout)
                        .build();
                (transport, settings.maildev_host.clone())
            }
            SmtpMode::Smtp => {
                let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                    .map_err(|e| ConfigError::InvalidValue {
                        name: "SMTP_HOST",
                        value: format!("{}: {e}", settings.host),
                    })?
                    .port(settings.port)
                    .timeout(timeout);

                if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
                    builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
                }

                (builder.build(), settings.host.clone())
            }
        };

        Ok(Self {
            transport,
            mode: settings.mode,
            host,
        })
    }
}

/// Build a multipart (plain + HTML) message.
pub fn build_message(email: &RenderedEmail) -> Result<Message, DeliveryFailure> {
    let from = parse_mailbox("from", &email.from_email)?;
    let to = parse_mailbox("to", &email.to_email)?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.as_str())
        .multipart(MultiPart::alternative_plain_html(
            email.text_body.clone(),
            email.html_body.clone(),
        ))
        .map_err(|e| DeliveryFailure::Build(e.to_string()))
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, email: &RenderedEmail) -> Result<(), DeliveryFailure> {
        let message = build_message(email)?;

        self.transport.send(message).await.map_err(|e| {
            error!(
                to = %email.to_email,
                host = %self.host,
                error = %e,
                "smtp_send_failed"
            );
            DeliveryFailure::Transport(e.to_string())
        })?;

        info!(to = %email.to_email, host = %self.host, mode = ?self.mode, "smtp_email_sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self.mode {
            SmtpMode::MailDev => "maildev",
            SmtpMode::Smtp => "smtp",
        }
    }
}
