//! Queue module: envelopes and the producer side of the bridge.
//!
//! ## Architecture
//!
//! ```text
//! API → send_mail / send_csv → Mailer → receive_mail / receive_csv → API
//! ```

pub mod codec;
pub mod producer;
pub mod types;

pub use producer::Producer;
pub use types::{
    CsvRowResult, EmailRequest, EmailStatusReport, Status, UploadedFileRef, CSV_GROUP,
    CSV_RECEIVE_GROUP, EMAIL_GROUP, EMAIL_RECEIVE_GROUP, NO_SUBJECT, RECEIVE_CSV_TOPIC,
    RECEIVE_MAIL_TOPIC, SEND_CSV_TOPIC, SEND_MAIL_TOPIC,
};
