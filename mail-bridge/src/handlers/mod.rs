//! Message handlers.
//!
//! A handler processes one decoded envelope and reports its outcome through
//! side effects (mail sent, status envelope published, record updated). The
//! consumer loop only logs the `Err` it gets back.
//!
//! ## Variants
//!
//! ```text
//! send_mail    → EmailSendHandler  → receive_mail
//! send_csv     → CsvBatchHandler   → receive_csv (one report per row)
//! receive_*    → StatusUpdateHandler → record store
//! ```

pub mod csv_batch;
pub mod email;
pub mod status;

use async_trait::async_trait;

use crate::error::{DeliveryFailure, HandlerError};
use crate::mail::{MailSender, TemplateRenderer};
use crate::queue::EmailRequest;

pub use csv_batch::CsvBatchHandler;
pub use email::EmailSendHandler;
pub use status::StatusUpdateHandler;

/// Processes one raw envelope pulled from a topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn process_message(&self, raw: &str) -> Result<(), HandlerError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

/// Render a request and hand it to the mailer.
pub(crate) async fn deliver(
    renderer: &TemplateRenderer,
    mailer: &dyn MailSender,
    request: &EmailRequest,
) -> Result<(), DeliveryFailure> {
    let email = renderer.render(request)?;
    mailer.send(&email).await
}
