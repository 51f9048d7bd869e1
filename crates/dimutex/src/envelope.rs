//! Wire encoding for lock records.
//!
//! A lock record is uploaded as a `multipart/related` body with two parts:
//! a JSON metadata envelope carrying the object name and its `expires`
//! custom metadata entry, followed by an opaque content part.
//!
//! ```text
//! --<boundary>
//! Content-Type: application/json; charset=UTF-8
//!
//! {"name":"locks/job","metadata":{"expires":"2024-05-01T12:00:00.25Z"}}
//! --<boundary>
//! Content-Type: text/plain
//!
//! lock
//! --<boundary>--
//! ```
//!
//! `expires` is written as RFC 3339 in UTC with as many fractional digits as
//! needed to represent the instant exactly, so a record read back compares
//! against the same instant it was written with.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::Upload;

/// Multipart boundary used for lock uploads.
pub const BOUNDARY: &str = "dimutex-3a9f0c6e51b24d7d8e0f";

/// Default content part of a lock record.
pub const DEFAULT_CONTENT: &[u8] = b"lock";

/// Custom metadata key holding the lease expiry.
pub const EXPIRES_KEY: &str = "expires";

/// Layout used by older writers (`year-day-month`, `UTC` suffix).
const LEGACY_EXPIRES_FORMAT: &str = "%Y-%d-%m %H:%M:%S%.f UTC";

const CRLF: &[u8] = b"\r\n";

/// JSON metadata part of a lock upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEnvelope {
    /// Object key.
    pub name: String,
    /// Custom metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ObjectEnvelope {
    /// Creates the envelope for a lock record expiring at `expires`.
    #[must_use]
    pub fn for_lock(name: impl Into<String>, expires: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            metadata: expires_metadata(expires),
        }
    }

    /// Returns the parsed `expires` entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the entry is missing or malformed.
    pub fn expires(&self) -> Result<DateTime<Utc>> {
        expires_from_metadata(&self.metadata)
    }
}

/// Builds a metadata map holding only the `expires` entry.
#[must_use]
pub fn expires_metadata(expires: DateTime<Utc>) -> HashMap<String, String> {
    HashMap::from([(EXPIRES_KEY.to_string(), format_expires(expires))])
}

/// Reads and parses the `expires` entry from custom metadata.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the entry is missing or malformed.
pub fn expires_from_metadata(metadata: &HashMap<String, String>) -> Result<DateTime<Utc>> {
    let raw = metadata
        .get(EXPIRES_KEY)
        .ok_or_else(|| Error::protocol("lock record has no expires metadata"))?;
    parse_expires(raw)
}

/// Formats an expiry instant for storage.
#[must_use]
pub fn format_expires(expires: DateTime<Utc>) -> String {
    expires.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses a stored expiry instant.
///
/// Accepts RFC 3339 with any offset, and the legacy
/// `%Y-%d-%m %H:%M:%S%.f UTC` layout.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if neither layout matches.
pub fn parse_expires(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_EXPIRES_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::protocol(format!("invalid expires timestamp {raw:?}: {e}")))
}

/// Encodes a lock upload.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the envelope cannot be serialized.
pub fn encode_upload(envelope: &ObjectEnvelope, content: &[u8]) -> Result<Upload> {
    let json = serde_json::to_vec(envelope)
        .map_err(|e| Error::protocol(format!("serialize lock envelope: {e}")))?;

    let delimiter = format!("--{BOUNDARY}");
    let mut body = BytesMut::with_capacity(json.len() + content.len() + 4 * delimiter.len());
    body.put_slice(delimiter.as_bytes());
    body.put_slice(CRLF);
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(&json);
    body.put_slice(CRLF);
    body.put_slice(delimiter.as_bytes());
    body.put_slice(CRLF);
    body.put_slice(b"Content-Type: text/plain\r\n\r\n");
    body.put_slice(content);
    body.put_slice(CRLF);
    body.put_slice(delimiter.as_bytes());
    body.put_slice(b"--");
    body.put_slice(CRLF);

    Ok(Upload {
        content_type: format!("multipart/related; boundary={BOUNDARY}"),
        body: body.freeze(),
    })
}

/// Decodes a lock upload back into its envelope and content.
///
/// Used by in-process stores and emulators that accept uploads.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the body is not a two-part
/// `multipart/related` payload with a JSON first part.
pub fn decode_upload(upload: &Upload) -> Result<(ObjectEnvelope, Bytes)> {
    let boundary = boundary_param(&upload.content_type).ok_or_else(|| {
        Error::protocol(format!(
            "missing multipart boundary in {:?}",
            upload.content_type
        ))
    })?;
    let delimiter = format!("--{boundary}");
    let parts = split_parts(&upload.body, delimiter.as_bytes())?;

    let [metadata, content] = parts.as_slice() else {
        return Err(Error::protocol(format!(
            "expected 2 multipart parts, found {}",
            parts.len()
        )));
    };

    let envelope: ObjectEnvelope = serde_json::from_slice(metadata)
        .map_err(|e| Error::protocol(format!("invalid metadata part: {e}")))?;
    Ok((envelope, content.clone()))
}

fn boundary_param(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
        .find(|b| !b.is_empty())
}

fn split_parts(body: &Bytes, delimiter: &[u8]) -> Result<Vec<Bytes>> {
    let first = find(body, delimiter)
        .ok_or_else(|| Error::protocol("multipart body has no delimiter"))?;
    let mut rest = body.slice(first + delimiter.len()..);
    let mut parts = Vec::new();

    while !rest.starts_with(b"--") {
        if rest.starts_with(CRLF) {
            rest = rest.slice(CRLF.len()..);
        }
        let end = find(&rest, delimiter)
            .ok_or_else(|| Error::protocol("unterminated multipart part"))?;
        let part = rest.slice(..end);
        let headers_end = find(&part, b"\r\n\r\n")
            .ok_or_else(|| Error::protocol("multipart part has no header terminator"))?;
        let mut data = part.slice(headers_end + 4..);
        if data.ends_with(CRLF) {
            data.truncate(data.len() - CRLF.len());
        }
        parts.push(data);
        rest = rest.slice(end + delimiter.len()..);
    }

    Ok(parts)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
