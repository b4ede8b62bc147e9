//! Opaque pagination cursor: URL-safe base64 of `"<iso-timestamp>|<id>"`,
//! padding stripped on encode and restored on decode.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;

pub fn encode(ts: DateTime<Utc>, id: Uuid) -> String {
    let raw = format!("{}|{}", ts.to_rfc3339(), id);
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

pub fn decode(cursor: &str) -> Result<(DateTime<Utc>, Uuid), Error> {
    let raw = URL_SAFE_NO_PAD
        .decode(cursor.as_bytes())
        .map_err(|e| Error::Validation(format!("malformed cursor: {e}")))?;
    let raw = String::from_utf8(raw)
        .map_err(|e| Error::Validation(format!("malformed cursor: {e}")))?;
    let (ts_str, id_str) = raw
        .split_once('|')
        .ok_or_else(|| Error::Validation("malformed cursor".to_string()))?;
    let ts = DateTime::parse_from_rfc3339(ts_str)
        .map_err(|e| Error::Validation(format!("malformed cursor timestamp: {e}")))?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id_str)
        .map_err(|e| Error::Validation(format!("malformed cursor id: {e}")))?;
    Ok((ts, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trips() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let id = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let encoded = encode(ts, id);
        assert!(!encoded.contains('='));
        let (decoded_ts, decoded_id) = decode(&encoded).unwrap();
        assert_eq!(decoded_ts, ts);
        assert_eq!(decoded_id, id);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("not-a-cursor").is_err());
    }
}
