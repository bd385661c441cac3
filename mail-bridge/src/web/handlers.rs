//! HTTP endpoint handlers for the API side.
//!
//! Enqueue endpoints persist a record first, then publish. A failed
//! publish leaves the record `pending` and answers `502`.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::config::Config;
use crate::mail::parse_mailbox;
use crate::queue::{EmailRequest, Producer, Status, UploadedFileRef};
use crate::records::{EmailRecord, NewEmail, NewUploadedFile, RecordStore, UploadedFileRecord};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub send_mail: Producer,
    pub send_csv: Producer,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RecordStore>, broker: Arc<dyn Broker>) -> Self {
        let send_mail = Producer::new(Arc::clone(&broker), config.topics.send_mail.clone());
        let send_csv = Producer::new(broker, config.topics.send_csv.clone());
        Self {
            config: Arc::new(config),
            store,
            send_mail,
            send_csv,
        }
    }
}

/// Response envelope for every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn respond<T>(code: StatusCode, message: impl Into<String>, data: Option<T>) -> ApiResult<T> {
    let status = if code.is_success() { "ok" } else { "error" };
    (
        code,
        Json(ApiResponse {
            status,
            message: message.into(),
            data,
        }),
    )
}

/// Liveness probe.
pub async fn health() -> &'static str {
    "OK"
}

// =============================================================================
// Emails
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SendMailRequest {
    pub subject: String,
    pub to_email: String,
    #[serde(default)]
    pub message_body: Option<String>,
}

pub async fn send_mail(
    State(state): State<AppState>,
    Json(body): Json<SendMailRequest>,
) -> ApiResult<EmailRecord> {
    if body.subject.trim().is_empty() {
        return respond(StatusCode::UNPROCESSABLE_ENTITY, "subject is required", None);
    }
    if let Err(e) = parse_mailbox("to_email", &body.to_email) {
        return respond(StatusCode::UNPROCESSABLE_ENTITY, e.to_string(), None);
    }

    let new_email = NewEmail {
        subject: body.subject,
        from_email: state.config.from_email.clone(),
        to_email: body.to_email.trim().to_string(),
        message_body: body.message_body,
        status: Status::Pending,
        status_message: None,
    };

    let record = match state.store.create_email(new_email).await {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, "email_record_create_failed");
            return respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None);
        }
    };

    let request = EmailRequest {
        id: Some(record.id),
        subject: record.subject.clone(),
        from_email: record.from_email.clone(),
        to_email: record.to_email.clone(),
        message_body: record.message_body.clone(),
        status: record.status,
    };

    if let Err(e) = state.send_mail.send(&request).await {
        warn!(id = record.id, error = %e, "email_enqueue_failed");
        return respond(StatusCode::BAD_GATEWAY, e.to_string(), Some(record));
    }

    info!(id = record.id, to = %record.to_email, "email_enqueued");
    respond(StatusCode::CREATED, "email queued", Some(record))
}

pub async fn list_emails(State(state): State<AppState>) -> ApiResult<Vec<EmailRecord>> {
    match state.store.list_emails().await {
        Ok(emails) => respond(StatusCode::OK, "emails", Some(emails)),
        Err(e) => {
            error!(error = %e, "email_list_failed");
            respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None)
        }
    }
}

// =============================================================================
// CSV uploads
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UploadCsvRequest {
    pub file_name: String,
    pub file_path: String,
    pub user_id: i64,
}

pub async fn upload_csv(
    State(state): State<AppState>,
    Json(body): Json<UploadCsvRequest>,
) -> ApiResult<UploadedFileRecord> {
    if body.file_path.trim().is_empty() {
        return respond(StatusCode::UNPROCESSABLE_ENTITY, "file_path is required", None);
    }

    let record = match state
        .store
        .create_file(NewUploadedFile {
            file_name: body.file_name,
            file_path: body.file_path,
            user_id: body.user_id,
        })
        .await
    {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, "file_record_create_failed");
            return respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None);
        }
    };

    let file_ref = UploadedFileRef {
        id: record.id,
        file_name: record.file_name.clone(),
        file_path: record.file_path.clone(),
        user_id: record.user_id,
    };

    if let Err(e) = state.send_csv.send(&file_ref).await {
        warn!(file_id = record.id, error = %e, "csv_enqueue_failed");
        return respond(StatusCode::BAD_GATEWAY, e.to_string(), Some(record));
    }

    info!(file_id = record.id, file_path = %record.file_path, "csv_enqueued");
    respond(StatusCode::CREATED, "file queued", Some(record))
}

pub async fn list_files(State(state): State<AppState>) -> ApiResult<Vec<UploadedFileRecord>> {
    match state.store.list_files().await {
        Ok(files) => respond(StatusCode::OK, "files", Some(files)),
        Err(e) => {
            error!(error = %e, "file_list_failed");
            respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None)
        }
    }
}
