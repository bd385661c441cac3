//! Lazy CSV row reader.
//!
//! Rows are produced one at a time from the underlying stream and keyed by
//! header name. The sequence is finite and cannot be restarted.
//!
//! [`CsvRows`] reads synchronously. Async callers use [`RowStream`], which
//! runs the reader on the blocking pool and hands rows over a bounded channel.

use std::collections::HashMap;

use csv::{ReaderBuilder, StringRecord, Trim};
use tokio::sync::mpsc;
use tracing::debug;

use super::ByteStream;
use crate::error::{StorageFailure, ValidationFailure};

/// Rows buffered between the reader thread and the consumer.
const ROW_BUFFER: usize = 32;

/// Columns every batch file must have.
pub const REQUIRED_COLUMNS: [&str; 4] = ["subject", "from_email", "to_email", "message_body"];

/// One CSV row keyed by column name.
pub type Row = HashMap<String, String>;

/// Iterator over the rows of a CSV stream.
pub struct CsvRows {
    reader: csv::Reader<ByteStream>,
    headers: Vec<String>,
    record: StringRecord,
    done: bool,
}

impl CsvRows {
    /// Read the header line and prepare to stream rows.
    pub fn open(stream: ByteStream) -> Result<Self, StorageFailure> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(stream);

        let headers = reader
            .headers()
            .map_err(|e| StorageFailure::Csv(e.to_string()))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        Ok(Self {
            reader,
            headers,
            record: StringRecord::new(),
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Required columns absent from the header, in declaration order.
    pub fn missing_columns(&self) -> Vec<String> {
        REQUIRED_COLUMNS
            .iter()
            .filter(|col| !self.headers.iter().any(|h| h == *col))
            .map(|col| col.to_string())
            .collect()
    }

    fn current_row(&self) -> Row {
        self.headers
            .iter()
            .cloned()
            .zip(self.record.iter().map(str::to_string))
            .collect()
    }
}

impl Iterator for CsvRows {
    type Item = Result<Row, ValidationFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.read_record(&mut self.record) {
            Ok(true) => Some(Ok(self.current_row())),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                // An IO error would repeat forever; record-level errors skip one row.
                if e.is_io_error() {
                    self.done = true;
                }
                Some(Err(ValidationFailure::Row(e.to_string())))
            }
        }
    }
}

/// Async view of a [`CsvRows`] reader.
///
/// Reads happen on a `spawn_blocking` thread, a bounded number of rows
/// ahead of the consumer. Dropping the stream stops the reader at its next row.
pub struct RowStream {
    missing: Vec<String>,
    rows: mpsc::Receiver<Result<Row, ValidationFailure>>,
}

impl RowStream {
    /// Read the header off the runtime. Rows are only read when the header
    /// has every required column.
    pub async fn open(stream: ByteStream) -> Result<Self, StorageFailure> {
        let reader = tokio::task::spawn_blocking(move || CsvRows::open(stream))
            .await
            .map_err(|e| StorageFailure::Csv(format!("csv reader task failed: {e}")))??;

        let missing = reader.missing_columns();
        let (tx, rx) = mpsc::channel(ROW_BUFFER);
        if missing.is_empty() {
            tokio::task::spawn_blocking(move || {
                for row in reader {
                    if tx.blocking_send(row).is_err() {
                        debug!("csv_reader_abandoned");
                        break;
                    }
                }
            });
        }

        Ok(Self { missing, rows: rx })
    }

    /// Required columns absent from the header, in declaration order.
    pub fn missing_columns(&self) -> &[String] {
        &self.missing
    }

    /// Next row, or `None` once the file is exhausted.
    pub async fn next(&mut self) -> Option<Result<Row, ValidationFailure>> {
        self.rows.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn rows(contents: &str) -> CsvRows {
        CsvRows::open(Box::new(Cursor::new(contents.as_bytes().to_vec()))).unwrap()
    }

    #[test]
    fn test_rows_are_keyed_by_header() {
        let mut reader = rows("subject,from_email,to_email,message_body\nHi,a@x.com,b@x.com,hello\n");
        assert!(reader.missing_columns().is_empty());

        let row = reader.next().unwrap().unwrap();
        assert_eq!(row["subject"], "Hi");
        assert_eq!(row["to_email"], "b@x.com");
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_bom_is_stripped() {
        let reader = rows("\u{feff}subject,from_email,to_email,message_body\n");
        assert_eq!(reader.headers()[0], "subject");
        assert!(reader.missing_columns().is_empty());
    }

    #[test]
    fn test_missing_columns() {
        let reader = rows("subject,from_email,message_body\nHi,a@x.com,hello\n");
        assert_eq!(reader.missing_columns(), vec!["to_email".to_string()]);
    }

    #[test]
    fn test_empty_file_misses_everything() {
        let reader = rows("");
        assert_eq!(reader.missing_columns().len(), 4);
    }

    #[test]
    fn test_short_row_lacks_keys() {
        let mut reader = rows("subject,from_email,to_email,message_body\nHi,a@x.com\n");
        let row = reader.next().unwrap().unwrap();
        assert_eq!(row.get("subject").map(String::as_str), Some("Hi"));
        assert!(!row.contains_key("to_email"));
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped() {
        let mut contents = b"subject,from_email,to_email,message_body\n".to_vec();
        contents.extend_from_slice(b"\xff\xfe,a@x.com,b@x.com,x\n");
        contents.extend_from_slice(b"Hi,a@x.com,b@x.com,hello\n");

        let mut reader = CsvRows::open(Box::new(Cursor::new(contents))).unwrap();
        assert!(matches!(reader.next(), Some(Err(ValidationFailure::Row(_)))));
        assert_eq!(reader.next().unwrap().unwrap()["subject"], "Hi");
        assert!(reader.next().is_none());
    }

    #[tokio::test]
    async fn test_row_stream_yields_rows_in_order() {
        let contents = format!(
            "subject,from_email,to_email,message_body\n{}",
            (0..100).map(|i| format!("S{i},a@x.com,b@x.com,m\n")).collect::<String>()
        );
        let mut stream = RowStream::open(Box::new(Cursor::new(contents.into_bytes())))
            .await
            .unwrap();
        assert!(stream.missing_columns().is_empty());

        let mut subjects = Vec::new();
        while let Some(row) = stream.next().await {
            subjects.push(row.unwrap()["subject"].clone());
        }
        assert_eq!(subjects.len(), 100);
        assert_eq!(subjects[0], "S0");
        assert_eq!(subjects[99], "S99");
    }

    #[tokio::test]
    async fn test_row_stream_with_missing_columns_is_empty() {
        let mut stream = RowStream::open(Box::new(Cursor::new(
            b"subject,message_body\nHi,hello\n".to_vec(),
        )))
        .await
        .unwrap();

        assert_eq!(
            stream.missing_columns(),
            ["from_email".to_string(), "to_email".to_string()]
        );
        assert!(stream.next().await.is_none());
    }
}
