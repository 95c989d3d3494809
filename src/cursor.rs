//! # Cursor Utilities
//!
//! Opaque keyset cursors for job listings. A cursor names the last job of the
//! previous page by `(start_time, id)`, matching the listing order
//! `start_time DESC, id DESC`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

const MAX_CURSOR_LEN: usize = 512;

/// Position of the last job returned on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCursor {
    pub start_time: DateTime<Utc>,
    pub id: Uuid,
}

/// Encode a cursor as URL-safe base64 JSON.
pub fn encode_cursor(start_time: &DateTime<Utc>, id: &Uuid) -> String {
    let json = serde_json::json!({
        "start_time": start_time,
        "id": id,
    });
    URL_SAFE_NO_PAD.encode(json.to_string().as_bytes())
}

/// Decode and validate a cursor produced by [`encode_cursor`].
pub fn decode_cursor(cursor: &str) -> Result<JobCursor, EngineError> {
    let invalid = |message: &str| EngineError::validation("cursor", message);

    if cursor.is_empty() {
        return Err(invalid("cursor cannot be empty"));
    }

    if cursor.len() > MAX_CURSOR_LEN {
        return Err(invalid("cursor is too long"));
    }

    if !cursor
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("cursor contains invalid characters"));
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid("cursor is not valid base64"))?;

    let data: JobCursor = serde_json::from_slice(&decoded)
        .map_err(|_| invalid("cursor contains invalid JSON structure"))?;

    if data.id.is_nil() {
        return Err(invalid("cursor contains invalid ID"));
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_returns_encoded_position() {
        let start_time = Utc::now();
        let id = Uuid::new_v4();

        let cursor = encode_cursor(&start_time, &id);
        let decoded = decode_cursor(&cursor).unwrap();

        assert_eq!(decoded.id, id);
        assert_eq!(decoded.start_time, start_time);
    }

    #[test]
    fn test_cursor_is_query_safe() {
        let cursor = encode_cursor(&Utc::now(), &Uuid::new_v4());
        assert!(!cursor.contains('+'));
        assert!(!cursor.contains('/'));
        assert!(!cursor.contains('='));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            decode_cursor(""),
            Err(EngineError::Validation { .. })
        ));
        assert!(decode_cursor("not a cursor!").is_err());
        assert!(decode_cursor(&URL_SAFE_NO_PAD.encode(b"{\"foo\":1}")).is_err());
        assert!(decode_cursor(&"a".repeat(MAX_CURSOR_LEN + 1)).is_err());
    }

    #[test]
    fn test_rejects_nil_id() {
        let cursor = encode_cursor(&Utc::now(), &Uuid::nil());
        assert!(decode_cursor(&cursor).is_err());
    }
}
