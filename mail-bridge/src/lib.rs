//! Mail Bridge - asynchronous messaging bridge for an email service.
//!
//! This library provides shared modules for the two binaries:
//! - `mail-bridge-api`: enqueues emails and CSV batches, records their outcome
//! - `mail-bridge-mailer`: sends the emails and reports back
//!
//! ## Architecture
//!
//! ```text
//! API → send_mail / send_csv → Mailer → receive_mail / receive_csv → API
//! ```
//!
//! Each side runs one consumer loop per (topic, consumer group) under a
//! [`ConsumerSupervisor`]; replies travel as new messages on the receive
//! topics.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod mail;
pub mod queue;
pub mod records;
pub mod storage;
pub mod supervisor;
pub mod web;

// Re-export commonly used types
pub use broker::{AmqpBroker, Broker, MemoryBroker};
pub use config::Config;
pub use consumer::{ConsumerState, MessageConsumer};
pub use error::{HandlerError, MessagingFailure};
pub use handlers::{CsvBatchHandler, EmailSendHandler, MessageHandler, StatusUpdateHandler};
pub use queue::{
    CsvRowResult, EmailRequest, EmailStatusReport, Producer, Status, UploadedFileRef,
    CSV_GROUP, CSV_RECEIVE_GROUP, EMAIL_GROUP, EMAIL_RECEIVE_GROUP,
};
pub use records::{MemoryRecordStore, RecordStore};
pub use supervisor::{shutdown_signal, ConsumerSpec, ConsumerSupervisor};
pub use web::AppState;
