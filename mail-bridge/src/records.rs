//! Record store for the API side.
//!
//! Holds email records (created by the API, updated from status reports)
//! and uploaded-file records. [`MemoryRecordStore`] is the in-process
//! implementation; a database-backed store plugs in behind [`RecordStore`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::queue::{CsvRowResult, Status};

/// A persisted email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailRecord {
    pub id: i64,
    pub subject: String,
    pub from_email: String,
    pub to_email: String,
    pub message_body: Option<String>,
    pub status: Status,
    pub status_message: Option<String>,
}

/// Fields for a new email record; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEmail {
    pub subject: String,
    pub from_email: String,
    pub to_email: String,
    pub message_body: Option<String>,
    pub status: Status,
    pub status_message: Option<String>,
}

impl NewEmail {
    /// Build a record from a status report. Fails if an address is missing.
    pub fn from_report(report: &CsvRowResult) -> Result<Self, StoreError> {
        let from_email = report
            .from_email
            .clone()
            .ok_or(StoreError::Incomplete("from_email"))?;
        let to_email = report
            .to_email
            .clone()
            .ok_or(StoreError::Incomplete("to_email"))?;

        Ok(Self {
            subject: report.subject.clone().unwrap_or_default(),
            from_email,
            to_email,
            message_body: report.message_body.clone(),
            status: report.status,
            status_message: report.status_message.clone(),
        })
    }

    fn with_id(self, id: i64) -> EmailRecord {
        EmailRecord {
            id,
            subject: self.subject,
            from_email: self.from_email,
            to_email: self.to_email,
            message_body: self.message_body,
            status: self.status,
            status_message: self.status_message,
        }
    }
}

/// A stored CSV upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFileRecord {
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUploadedFile {
    pub file_name: String,
    pub file_path: String,
    pub user_id: i64,
}

/// What [`RecordStore::apply_status`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Updated,
    Inserted,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_email(&self, email: NewEmail) -> Result<EmailRecord, StoreError>;

    async fn get_email(&self, id: i64) -> Result<Option<EmailRecord>, StoreError>;

    /// Set status and status message on `id`, inserting the report under
    /// that id if no record exists. Last write wins.
    async fn apply_status(&self, id: i64, report: &CsvRowResult) -> Result<StatusOutcome, StoreError>;

    async fn list_emails(&self) -> Result<Vec<EmailRecord>, StoreError>;

    async fn create_file(&self, file: NewUploadedFile) -> Result<UploadedFileRecord, StoreError>;

    async fn list_files(&self) -> Result<Vec<UploadedFileRecord>, StoreError>;
}

#[derive(Default)]
struct Tables {
    emails: BTreeMap<i64, EmailRecord>,
    files: BTreeMap<i64, UploadedFileRecord>,
    last_email_id: i64,
    last_file_id: i64,
}

/// In-memory [`RecordStore`].
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_email(&self, email: NewEmail) -> Result<EmailRecord, StoreError> {
        let mut tables = self.tables.write().await;
        tables.last_email_id += 1;
        let record = email.with_id(tables.last_email_id);
        tables.emails.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_email(&self, id: i64) -> Result<Option<EmailRecord>, StoreError> {
        Ok(self.tables.read().await.emails.get(&id).cloned())
    }

    async fn apply_status(&self, id: i64, report: &CsvRowResult) -> Result<StatusOutcome, StoreError> {
        let mut tables = self.tables.write().await;

        if let Some(record) = tables.emails.get_mut(&id) {
            record.status = report.status;
            record.status_message = report.status_message.clone();
            return Ok(StatusOutcome::Updated);
        }

        let record = NewEmail::from_report(report)?.with_id(id);
        tables.emails.insert(id, record);
        tables.last_email_id = tables.last_email_id.max(id);
        Ok(StatusOutcome::Inserted)
    }

    async fn list_emails(&self) -> Result<Vec<EmailRecord>, StoreError> {
        Ok(self.tables.read().await.emails.values().cloned().collect())
    }

    async fn create_file(&self, file: NewUploadedFile) -> Result<UploadedFileRecord, StoreError> {
        let mut tables = self.tables.write().await;
        tables.last_file_id += 1;
        let record = UploadedFileRecord {
            id: tables.last_file_id,
            file_name: file.file_name,
            file_path: file.file_path,
            user_id: file.user_id,
        };
        tables.files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_files(&self) -> Result<Vec<UploadedFileRecord>, StoreError> {
        Ok(self.tables.read().await.files.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_email() -> NewEmail {
        NewEmail {
            subject: "Hi".into(),
            from_email: "a@x.com".into(),
            to_email: "b@x.com".into(),
            message_body: Some("hello".into()),
            status: Status::Pending,
            status_message: None,
        }
    }

    fn report(status: Status, message: &str) -> CsvRowResult {
        CsvRowResult {
            id: None,
            subject: Some("Hi".into()),
            from_email: Some("a@x.com".into()),
            to_email: Some("b@x.com".into()),
            message_body: None,
            status,
            status_message: Some(message.into()),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let store = MemoryRecordStore::new();
        let first = store.create_email(new_email()).await.unwrap();
        let second = store.create_email(new_email()).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.list_emails().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_apply_status_updates_existing() {
        let store = MemoryRecordStore::new();
        let record = store.create_email(new_email()).await.unwrap();

        let outcome = store
            .apply_status(record.id, &report(Status::Success, "success"))
            .await
            .unwrap();
        assert_eq!(outcome, StatusOutcome::Updated);

        let stored = store.get_email(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Success);
        assert_eq!(stored.status_message.as_deref(), Some("success"));
        assert_eq!(stored.message_body.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_apply_status_last_write_wins() {
        let store = MemoryRecordStore::new();
        let record = store.create_email(new_email()).await.unwrap();

        store
            .apply_status(record.id, &report(Status::Success, "success"))
            .await
            .unwrap();
        store
            .apply_status(record.id, &report(Status::Error, "bounced"))
            .await
            .unwrap();

        let stored = store.get_email(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Error);
        assert_eq!(stored.status_message.as_deref(), Some("bounced"));
    }

    #[tokio::test]
    async fn test_apply_status_inserts_unknown_id() {
        let store = MemoryRecordStore::new();
        let outcome = store
            .apply_status(42, &report(Status::Success, "success"))
            .await
            .unwrap();
        assert_eq!(outcome, StatusOutcome::Inserted);
        assert!(store.get_email(42).await.unwrap().is_some());

        let next = store.create_email(new_email()).await.unwrap();
        assert_eq!(next.id, 43);
    }

    #[tokio::test]
    async fn test_apply_status_incomplete_report() {
        let store = MemoryRecordStore::new();
        let mut incomplete = report(Status::Success, "success");
        incomplete.to_email = None;

        let err = store.apply_status(5, &incomplete).await.unwrap_err();
        assert!(matches!(err, StoreError::Incomplete("to_email")));
        assert!(store.list_emails().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_files() {
        let store = MemoryRecordStore::new();
        let file = store
            .create_file(NewUploadedFile {
                file_name: "batch.csv".into(),
                file_path: "uploads/batch.csv".into(),
                user_id: 9,
            })
            .await
            .unwrap();
        assert_eq!(file.id, 1);
        assert_eq!(store.list_files().await.unwrap(), vec![file]);
    }
}
