//! Cursor pagination for the VOD session listing

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::SessionId;
use crate::{Error, Result};

/// Default page size for list queries
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Maximum allowed page size
pub const MAX_PAGE_SIZE: u32 = 100;

/// Incoming page request: clamped limit plus an opaque cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: u32,
    pub cursor: Option<String>,
}

impl PageRequest {
    #[must_use]
    pub fn new(limit: Option<u32>, cursor: Option<String>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            cursor,
        }
    }
}

/// Outgoing pagination info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Position in the newest-first session listing: the `started_at` and id of
/// the last row already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCursor {
    pub started_at: DateTime<Utc>,
    pub session_id: SessionId,
}

/// Encode a cursor as base64("nanos:session_id"). Nanosecond fidelity
/// matters: the `(started_at, id)` tuple must round-trip exactly or rows
/// sharing a coarser timestamp would be skipped at page boundaries.
#[must_use]
pub fn encode_cursor(cursor: &SessionCursor) -> String {
    let nanos = cursor
        .started_at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| cursor.started_at.timestamp_micros().saturating_mul(1_000));
    let raw = format!("{}:{}", nanos, cursor.session_id.as_str());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

pub fn decode_cursor(encoded: &str) -> Result<SessionCursor> {
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| Error::InvalidInput("Malformed pagination cursor".to_string()))?;
    let raw = String::from_utf8(raw)
        .map_err(|_| Error::InvalidInput("Malformed pagination cursor".to_string()))?;

    let (nanos, id) = raw
        .split_once(':')
        .ok_or_else(|| Error::InvalidInput("Malformed pagination cursor".to_string()))?;
    let nanos: i64 = nanos
        .parse()
        .map_err(|_| Error::InvalidInput("Malformed pagination cursor".to_string()))?;
    let started_at = DateTime::from_timestamp_nanos(nanos);

    Ok(SessionCursor {
        started_at,
        session_id: SessionId::from_string(id.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = SessionCursor {
            started_at: Utc::now(),
            session_id: SessionId::from_string("abc123def456".to_string()),
        };
        let decoded = decode_cursor(&encode_cursor(&cursor)).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_cursor("%%%").is_err());
        assert!(decode_cursor("aGVsbG8").is_err()); // "hello", no separator
    }

    #[test]
    fn test_limit_clamped() {
        assert_eq!(PageRequest::new(None, None).limit, DEFAULT_PAGE_SIZE);
        assert_eq!(PageRequest::new(Some(0), None).limit, 1);
        assert_eq!(PageRequest::new(Some(500), None).limit, MAX_PAGE_SIZE);
    }
}
