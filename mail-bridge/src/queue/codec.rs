//! Envelope codec: typed payloads to and from UTF-8 JSON bytes.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::DecodeFailure;

/// Serialize a payload into the bytes published on the broker.
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}

/// Decode a raw delivery body into text.
pub fn decode_text(body: &[u8]) -> Result<&str, DecodeFailure> {
    Ok(std::str::from_utf8(body)?)
}

/// Decode envelope text into a typed payload.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeFailure> {
    Ok(serde_json::from_str(raw)?)
}
