//! Envelope payloads carried on the four bridge topics.
//!
//! - `send_mail` / `send_csv`: requests into the mail-sending service
//! - `receive_mail` / `receive_csv`: status reports back to the API side
//!
//! Field order is the wire order. Optional fields are encoded as `null`
//! rather than skipped, so re-encoding a decoded envelope is byte-stable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default topic for single email requests.
pub const SEND_MAIL_TOPIC: &str = "send_mail";

/// Default topic for single email status reports.
pub const RECEIVE_MAIL_TOPIC: &str = "receive_mail";

/// Default topic for CSV batch requests.
pub const SEND_CSV_TOPIC: &str = "send_csv";

/// Default topic for CSV row status reports.
pub const RECEIVE_CSV_TOPIC: &str = "receive_csv";

/// Mail service group on the send-mail topic.
pub const EMAIL_GROUP: &str = "EmailGroupID";

/// API service group on the receive-mail topic.
pub const EMAIL_RECEIVE_GROUP: &str = "EmailGroupRecieveID";

/// Mail service group on the send-csv topic.
pub const CSV_GROUP: &str = "CSVGroupID";

/// API service group on the receive-csv topic.
pub const CSV_RECEIVE_GROUP: &str = "CSVGroupReceiveID";

/// Subject used for CSV reports that have no usable subject.
pub const NO_SUBJECT: &str = "No subject";

/// Status message attached to successful sends.
pub const SUCCESS_MESSAGE: &str = "success";

/// Processing status of an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Success,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Success => "success",
            Status::Error => "error",
        };
        f.write_str(s)
    }
}

/// Returns a non-empty status message for an error.
fn error_message(reason: impl ToString) -> String {
    let reason = reason.to_string();
    if reason.trim().is_empty() {
        "unknown error".to_string()
    } else {
        reason
    }
}

// =============================================================================
// Requests (send topics)
// =============================================================================

/// A single email to send, published on `send_mail`.
///
/// `id` points at the persisted record on the API side; ad-hoc sends have none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub id: Option<i64>,
    pub subject: String,
    pub from_email: String,
    pub to_email: String,
    #[serde(default)]
    pub message_body: Option<String>,
    #[serde(default)]
    pub status: Status,
}

/// Pointer to a CSV batch already in storage, published on `send_csv`.
///
/// The envelope never carries the file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFileRef {
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub user_id: i64,
}

// =============================================================================
// Status reports (receive topics)
// =============================================================================

/// Outcome of an [`EmailRequest`], published on `receive_mail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailStatusReport {
    #[serde(default)]
    pub id: Option<i64>,
    pub subject: String,
    pub from_email: String,
    pub to_email: String,
    #[serde(default)]
    pub message_body: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub status_message: Option<String>,
}

impl EmailStatusReport {
    pub fn success(request: EmailRequest) -> Self {
        Self::from_request(request, Status::Success, SUCCESS_MESSAGE.to_string())
    }

    pub fn failure(request: EmailRequest, reason: impl ToString) -> Self {
        Self::from_request(request, Status::Error, error_message(reason))
    }

    fn from_request(request: EmailRequest, status: Status, message: String) -> Self {
        Self {
            id: request.id,
            subject: request.subject,
            from_email: request.from_email,
            to_email: request.to_email,
            message_body: request.message_body,
            status,
            status_message: Some(message),
        }
    }
}

/// Outcome of one CSV row, published on `receive_csv`.
///
/// Rows may lack every identity field, so all of them are optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvRowResult {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default = "default_subject")]
    pub subject: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub to_email: Option<String>,
    #[serde(default)]
    pub message_body: Option<String>,
    #[serde(default = "default_row_status")]
    pub status: Status,
    #[serde(default)]
    pub status_message: Option<String>,
}

fn default_subject() -> Option<String> {
    Some(NO_SUBJECT.to_string())
}

fn default_row_status() -> Status {
    Status::Error
}

impl Default for CsvRowResult {
    fn default() -> Self {
        Self {
            id: None,
            subject: default_subject(),
            from_email: None,
            to_email: None,
            message_body: None,
            status: Status::Error,
            status_message: None,
        }
    }
}

impl CsvRowResult {
    /// Batch-level error with no row attached (unreadable file, bad header).
    pub fn batch_error(reason: impl ToString) -> Self {
        Self {
            status_message: Some(error_message(reason)),
            ..Self::default()
        }
    }

    /// A row that was sent successfully.
    pub fn success(email: &EmailRequest) -> Self {
        Self {
            id: email.id,
            subject: Some(email.subject.clone()),
            from_email: Some(email.from_email.clone()),
            to_email: Some(email.to_email.clone()),
            message_body: email.message_body.clone(),
            status: Status::Success,
            status_message: Some(SUCCESS_MESSAGE.to_string()),
        }
    }

    /// A row that failed, keeping whatever fields it had.
    pub fn row_error(
        subject: Option<String>,
        from_email: Option<String>,
        to_email: Option<String>,
        message_body: Option<String>,
        reason: impl ToString,
    ) -> Self {
        Self {
            id: None,
            subject: subject.filter(|s| !s.trim().is_empty()).or_else(default_subject),
            from_email,
            to_email,
            message_body,
            status: Status::Error,
            status_message: Some(error_message(reason)),
        }
    }

    /// Whether the report names a real subject.
    pub fn has_usable_subject(&self) -> bool {
        match self.subject.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(s) => s != NO_SUBJECT && s != "no_subject",
        }
    }
}

impl From<EmailStatusReport> for CsvRowResult {
    fn from(report: EmailStatusReport) -> Self {
        Self {
            id: report.id,
            subject: Some(report.subject),
            from_email: Some(report.from_email),
            to_email: Some(report.to_email),
            message_body: report.message_body,
            status: report.status,
            status_message: report.status_message,
        }
    }
}
