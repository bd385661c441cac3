//! Status report handler for the API side.
//!
//! Applies `receive_mail` / `receive_csv` reports to the record store:
//! reports with an id update (or create) that record, reports without one
//! create a new record, and error reports without a real subject are
//! discarded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::MessageHandler;
use crate::error::HandlerError;
use crate::queue::{codec, CsvRowResult, Status};
use crate::records::{NewEmail, RecordStore};

pub struct StatusUpdateHandler {
    store: Arc<dyn RecordStore>,
    name: &'static str,
}

impl StatusUpdateHandler {
    /// `name` distinguishes the mail and CSV report consumers in logs.
    pub fn new(store: Arc<dyn RecordStore>, name: &'static str) -> Self {
        Self { store, name }
    }

    pub async fn apply(&self, report: CsvRowResult) -> Result<(), HandlerError> {
        if report.status == Status::Error && !report.has_usable_subject() {
            warn!(
                handler = self.name,
                status_message = ?report.status_message,
                "status_report_discarded"
            );
            return Ok(());
        }

        match report.id {
            Some(id) => {
                let outcome = self.store.apply_status(id, &report).await?;
                info!(
                    handler = self.name,
                    id,
                    status = %report.status,
                    outcome = ?outcome,
                    "status_report_applied"
                );
            }
            None => match NewEmail::from_report(&report) {
                Ok(email) => {
                    let record = self.store.create_email(email).await?;
                    info!(
                        handler = self.name,
                        id = record.id,
                        status = %record.status,
                        "status_report_recorded"
                    );
                }
                Err(e) => {
                    warn!(handler = self.name, error = %e, "status_report_discarded");
                }
            },
        }

        Ok(())
    }
}

#[async_trait]
impl MessageHandler for StatusUpdateHandler {
    async fn process_message(&self, raw: &str) -> Result<(), HandlerError> {
        let report: CsvRowResult = codec::decode(raw)?;
        self.apply(report).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
