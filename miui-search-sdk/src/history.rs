//! History blob codec
//!
//! The upstream receives the prior turns on every query as a gzip-compressed
//! JSON array (`rawLastQueryList`). The same context is also reachable through
//! the internal conversation id, but the field is still sent for
//! compatibility.

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};

use crate::{errors::Result, types::Message};

/// Serialize `history` to JSON and gzip it.
pub fn compress_history(history: &[Message]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(history)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2 + 32), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress_history`].
pub fn decompress_history(raw: &[u8]) -> Result<Vec<Message>> {
    let mut json = Vec::new();
    GzDecoder::new(raw).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}
