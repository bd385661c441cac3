//! CSV batch handler.
//!
//! Resolves the referenced file, streams its rows, and publishes one
//! [`CsvRowResult`] per row. A bad row never aborts the batch; an unreadable
//! file or header produces a single batch-level error instead.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::Address;
use tracing::{debug, info, warn};

use super::{deliver, MessageHandler};
use crate::error::{HandlerError, ValidationFailure};
use crate::mail::{MailSender, TemplateRenderer};
use crate::queue::{codec, CsvRowResult, EmailRequest, Producer, Status, UploadedFileRef};
use crate::storage::{Row, RowStream, Storage};

const ADDRESS_MIN_LEN: usize = 5;
const ADDRESS_MAX_LEN: usize = 100;

/// Per-batch counters for the completion log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub rows: usize,
    pub sent: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, status: Status) {
        self.rows += 1;
        match status {
            Status::Success => self.sent += 1,
            _ => self.failed += 1,
        }
    }
}

pub struct CsvBatchHandler {
    storage: Arc<dyn Storage>,
    renderer: Arc<TemplateRenderer>,
    mailer: Arc<dyn MailSender>,
    reports: Producer,
}

impl CsvBatchHandler {
    pub fn new(
        storage: Arc<dyn Storage>,
        renderer: Arc<TemplateRenderer>,
        mailer: Arc<dyn MailSender>,
        reports: Producer,
    ) -> Self {
        Self {
            storage,
            renderer,
            mailer,
            reports,
        }
    }

    /// Process a decoded batch reference, returning row counts.
    pub async fn process_batch(&self, file: &UploadedFileRef) -> Result<BatchSummary, HandlerError> {
        info!(
            file_id = file.id,
            file_path = %file.file_path,
            user_id = file.user_id,
            "csv_batch_started"
        );

        let mut rows = match self.open_rows(file).await {
            Ok(rows) => rows,
            Err(report) => {
                self.reports.send(&report).await?;
                return Ok(BatchSummary {
                    rows: 0,
                    sent: 0,
                    failed: 1,
                });
            }
        };

        let mut summary = BatchSummary::default();
        let mut index = 0;
        while let Some(row) = rows.next().await {
            index += 1;
            let report = match row {
                Ok(row) => self.process_row(&row).await,
                Err(e) => CsvRowResult::row_error(None, None, None, None, e),
            };

            debug!(
                file_id = file.id,
                row = index,
                status = %report.status,
                "csv_row_processed"
            );

            summary.record(report.status);
            self.reports.send(&report).await?;
        }

        info!(
            file_id = file.id,
            rows = summary.rows,
            sent = summary.sent,
            failed = summary.failed,
            report_topic = self.reports.topic(),
            "csv_batch_completed"
        );
        Ok(summary)
    }

    /// Open the batch file and check its header. On failure, returns the
    /// batch-level error report to publish.
    async fn open_rows(&self, file: &UploadedFileRef) -> Result<RowStream, CsvRowResult> {
        let stream = self.storage.open_for_read(&file.file_path).await.map_err(|e| {
            warn!(file_id = file.id, file_path = %file.file_path, error = %e, "csv_batch_unreadable");
            CsvRowResult::batch_error(e)
        })?;

        let rows = RowStream::open(stream).await.map_err(|e| {
            warn!(file_id = file.id, error = %e, "csv_batch_unreadable");
            CsvRowResult::batch_error(e)
        })?;

        let missing = rows.missing_columns();
        if !missing.is_empty() {
            let err = ValidationFailure::MissingColumns(missing.to_vec());
            warn!(file_id = file.id, error = %err, "csv_batch_invalid_header");
            return Err(CsvRowResult::batch_error(err));
        }

        Ok(rows)
    }

    async fn process_row(&self, row: &Row) -> CsvRowResult {
        let request = match validate_row(row) {
            Ok(request) => request,
            Err(e) => {
                return CsvRowResult::row_error(
                    field(row, "subject"),
                    field(row, "from_email"),
                    field(row, "to_email"),
                    field(row, "message_body"),
                    e,
                )
            }
        };

        match deliver(&self.renderer, self.mailer.as_ref(), &request).await {
            Ok(()) => CsvRowResult::success(&request),
            Err(e) => {
                warn!(to = %request.to_email, error = %e, "csv_row_send_failed");
                CsvRowResult::row_error(
                    Some(request.subject),
                    Some(request.from_email),
                    Some(request.to_email),
                    request.message_body,
                    e,
                )
            }
        }
    }
}

#[async_trait]
impl MessageHandler for CsvBatchHandler {
    async fn process_message(&self, raw: &str) -> Result<(), HandlerError> {
        let file: UploadedFileRef = codec::decode(raw)?;
        self.process_batch(&file).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "csv_batch"
    }
}

fn field(row: &Row, name: &str) -> Option<String> {
    row.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

fn required(row: &Row, name: &'static str) -> Result<String, ValidationFailure> {
    field(row, name).ok_or(ValidationFailure::MissingField(name))
}

fn address(row: &Row, name: &'static str) -> Result<String, ValidationFailure> {
    let value = required(row, name)?;

    let len = value.chars().count();
    if !(ADDRESS_MIN_LEN..=ADDRESS_MAX_LEN).contains(&len) {
        return Err(ValidationFailure::Length {
            field: name,
            min: ADDRESS_MIN_LEN,
            max: ADDRESS_MAX_LEN,
        });
    }

    value
        .parse::<Address>()
        .map_err(|_| ValidationFailure::InvalidAddress {
            field: name,
            value: value.clone(),
        })?;

    Ok(value)
}

/// Turn a CSV row into a send request.
pub fn validate_row(row: &Row) -> Result<EmailRequest, ValidationFailure> {
    Ok(EmailRequest {
        id: None,
        subject: required(row, "subject")?,
        from_email: address(row, "from_email")?,
        to_email: address(row, "to_email")?,
        message_body: field(row, "message_body"),
        status: Status::Pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::broker::MemoryBroker;
    use crate::error::StorageFailure;
    use crate::mail::MemoryMailer;
    use crate::queue::{NO_SUBJECT, RECEIVE_CSV_TOPIC};
    use crate::storage::{ByteStream, LocalStorage, MemoryStorage};

    const HEADER: &str = "subject,from_email,to_email,message_body\n";

    struct Fixture {
        broker: MemoryBroker,
        mailer: Arc<MemoryMailer>,
        handler: CsvBatchHandler,
    }

    fn fixture(storage: Arc<dyn Storage>) -> Fixture {
        let broker = MemoryBroker::new();
        let mailer = Arc::new(MemoryMailer::new());
        let renderer = Arc::new(TemplateRenderer::with_default_template("Header").unwrap());
        let reports = Producer::new(Arc::new(broker.clone()), RECEIVE_CSV_TOPIC);
        let handler = CsvBatchHandler::new(storage, renderer, mailer.clone(), reports);
        Fixture {
            broker,
            mailer,
            handler,
        }
    }

    fn batch(path: &str) -> String {
        format!(r#"{{"id":1,"file_name":"batch.csv","file_path":"{path}","user_id":9}}"#)
    }

    fn row(values: &[(&str, &str)]) -> Row {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_valid_and_invalid_rows_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{HEADER}Hi,a@x.com,b@x.com,one\n\
             Hello,a@x.com,c@x.com,two\n\
             ,a@x.com,d@x.com,no subject\n\
             Bad,a@x.com,not-an-address,three\n\
             Hey,a@x.com,e@x.com,four\n"
        );
        std::fs::write(dir.path().join("batch.csv"), contents).unwrap();

        let f = fixture(Arc::new(LocalStorage::new(dir.path())));
        f.handler.process_message(&batch("batch.csv")).await.unwrap();

        let reports: Vec<CsvRowResult> = f.broker.published(RECEIVE_CSV_TOPIC);
        assert_eq!(reports.len(), 5);
        let statuses: Vec<Status> = reports.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                Status::Success,
                Status::Success,
                Status::Error,
                Status::Error,
                Status::Success
            ]
        );
        assert_eq!(reports[2].subject.as_deref(), Some(NO_SUBJECT));
        assert_eq!(reports[3].to_email.as_deref(), Some("not-an-address"));
        assert_eq!(f.mailer.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_file_reports_single_error() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(Arc::new(LocalStorage::new(dir.path())));

        f.handler.process_message(&batch("gone.csv")).await.unwrap();

        let reports: Vec<CsvRowResult> = f.broker.published(RECEIVE_CSV_TOPIC);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, Status::Error);
        assert!(reports[0]
            .status_message
            .as_deref()
            .unwrap()
            .contains("not found"));
        assert!(!reports[0].has_usable_subject());
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_columns_reports_single_error() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("batch.csv", "subject,from_email,message_body\nHi,a@x.com,one\n");
        let f = fixture(storage);

        let summary = f
            .handler
            .process_batch(&codec::decode(&batch("batch.csv")).unwrap())
            .await
            .unwrap();

        assert_eq!(summary.rows, 0);
        let reports: Vec<CsvRowResult> = f.broker.published(RECEIVE_CSV_TOPIC);
        assert_eq!(reports.len(), 1);
        assert!(reports[0]
            .status_message
            .as_deref()
            .unwrap()
            .contains("missing required columns: to_email"));
        assert!(f.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_batch() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(
            "batch.csv",
            format!("{HEADER}Hi,a@x.com,bounce@x.com,one\nHi,a@x.com,ok@x.com,two\n"),
        );
        let f = fixture(storage);
        f.mailer.fail_for("bounce@x.com");

        let summary = f
            .handler
            .process_batch(&codec::decode(&batch("batch.csv")).unwrap())
            .await
            .unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                rows: 2,
                sent: 1,
                failed: 1
            }
        );
        let reports: Vec<CsvRowResult> = f.broker.published(RECEIVE_CSV_TOPIC);
        assert_eq!(reports[0].subject.as_deref(), Some("Hi"));
        assert_eq!(reports[0].status, Status::Error);
        assert_eq!(reports[1].status, Status::Success);
    }

    #[tokio::test]
    async fn test_header_only_file_sends_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("batch.csv", HEADER);
        let f = fixture(storage);

        f.handler.process_message(&batch("batch.csv")).await.unwrap();
        assert!(f.broker.messages(RECEIVE_CSV_TOPIC).is_empty());
    }

    /// Hands out its chunks one read at a time, sleeping before each.
    struct SlowReader {
        chunks: VecDeque<(Duration, Vec<u8>)>,
    }

    impl Read for SlowReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let Some((delay, chunk)) = self.chunks.pop_front() else {
                return Ok(0);
            };
            std::thread::sleep(delay);
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    struct SlowStorage {
        row_delay: Duration,
    }

    #[async_trait]
    impl Storage for SlowStorage {
        async fn open_for_read(&self, _path: &str) -> Result<ByteStream, StorageFailure> {
            Ok(Box::new(SlowReader {
                chunks: VecDeque::from([
                    (Duration::ZERO, HEADER.as_bytes().to_vec()),
                    (self.row_delay, b"Hi,a@x.com,b@x.com,one\n".to_vec()),
                ]),
            }))
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_file_does_not_stall_other_tasks() {
        let f = fixture(Arc::new(SlowStorage {
            row_delay: Duration::from_millis(300),
        }));

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = Arc::clone(&ticks);
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let summary = f
            .handler
            .process_batch(&codec::decode(&batch("batch.csv")).unwrap())
            .await
            .unwrap();
        let ticked = ticks.load(Ordering::SeqCst);
        ticker.abort();

        assert_eq!(summary.sent, 1);
        assert_eq!(f.broker.messages(RECEIVE_CSV_TOPIC).len(), 1);
        assert!(ticked >= 5, "ticker only ran {ticked} times during the batch");
    }

    #[tokio::test]
    async fn test_path_outside_storage_reports_single_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("uploads");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(
            dir.path().join("secret.csv"),
            format!("{HEADER}secret,a@x.com,b@x.com,hidden\n"),
        )
        .unwrap();
        let f = fixture(Arc::new(LocalStorage::new(&base)));

        f.handler
            .process_message(&batch("../secret.csv"))
            .await
            .unwrap();

        let reports: Vec<CsvRowResult> = f.broker.published(RECEIVE_CSV_TOPIC);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, Status::Error);
        assert!(reports[0]
            .status_message
            .as_deref()
            .unwrap()
            .contains("invalid file path"));
        assert!(f.mailer.sent().is_empty());
    }

    #[test]
    fn test_validate_row() {
        let ok = validate_row(&row(&[
            ("subject", "Hi"),
            ("from_email", "a@x.com"),
            ("to_email", "b@x.com"),
            ("message_body", ""),
        ]))
        .unwrap();
        assert_eq!(ok.to_email, "b@x.com");
        assert_eq!(ok.message_body, None);

        let err = validate_row(&row(&[("subject", "Hi"), ("from_email", "a@x.com")])).unwrap_err();
        assert_eq!(err, ValidationFailure::MissingField("to_email"));

        let long = format!("{}@x.com", "a".repeat(100));
        let err = validate_row(&row(&[
            ("subject", "Hi"),
            ("from_email", "a@x.com"),
            ("to_email", long.as_str()),
        ]))
        .unwrap_err();
        assert!(matches!(err, ValidationFailure::Length { field: "to_email", .. }));

        let err = validate_row(&row(&[
            ("subject", "Hi"),
            ("from_email", "a@x"),
            ("to_email", "b@x.com"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ValidationFailure::Length { field: "from_email", .. }));
    }
}
