//! Email template rendering using Handlebars.
//!
//! The HTML template gets two variables, `header_text` and `message_body`.
//! The plain-text part is fixed.

use std::path::Path;

use handlebars::Handlebars;
use serde_json::json;
use tracing::debug;

use super::RenderedEmail;
use crate::error::{ConfigError, DeliveryFailure};
use crate::queue::EmailRequest;

const TEMPLATE_NAME: &str = "email_html";

/// Plain-text alternative sent with every email.
pub const PLAIN_TEXT_BODY: &str = "Please view this email in an HTML-capable email client.";

/// Template used when no `TEMPLATE_PATH` is configured.
pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
  <body style="font-family: Arial, sans-serif; color: #333333;">
    <h2>{{header_text}}</h2>
    <div>{{message_body}}</div>
  </body>
</html>
"#;

/// Renders requests into deliverable emails.
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
    header_text: String,
}

impl TemplateRenderer {
    pub fn new(template: &str, header_text: impl Into<String>) -> Result<Self, ConfigError> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string(TEMPLATE_NAME, template)
            .map_err(|e| ConfigError::Template {
                path: TEMPLATE_NAME.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            handlebars,
            header_text: header_text.into(),
        })
    }

    /// Load the HTML template from disk.
    pub fn from_file(path: &Path, header_text: impl Into<String>) -> Result<Self, ConfigError> {
        let template = std::fs::read_to_string(path).map_err(|e| ConfigError::Template {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::new(&template, header_text).map_err(|e| match e {
            ConfigError::Template { reason, .. } => ConfigError::Template {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn with_default_template(header_text: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(DEFAULT_TEMPLATE, header_text)
    }

    pub fn render(&self, email: &EmailRequest) -> Result<RenderedEmail, DeliveryFailure> {
        let data = json!({
            "header_text": self.header_text,
            "message_body": email.message_body,
        });

        let html_body = self
            .handlebars
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| DeliveryFailure::Render(e.to_string()))?;

        debug!(
            to = %email.to_email,
            html_length = html_body.len(),
            "email_template_rendered"
        );

        Ok(RenderedEmail {
            subject: email.subject.clone(),
            from_email: email.from_email.clone(),
            to_email: email.to_email.clone(),
            html_body,
            text_body: PLAIN_TEXT_BODY.to_string(),
        })
    }
}
