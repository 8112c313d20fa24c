// Inbound message decoding (spec §3 "Message").
//
// A `Message` is what the log client hands the ingester for one partition,
// one at a time, in a batch. `payload` is opaque bytes on the wire; the
// ingester only needs `team_token`, `session_id`, and the raw event bytes
// out of it, so decoding is a thin JSON envelope rather than a full event
// schema.

use serde::{Deserialize, Serialize};

/// One record delivered by the log client for a single partition.
///
/// `offset` is strictly monotonic within a partition -- callers (the
/// ingester's batch handler) are responsible for that invariant; this type
/// does not enforce it since a single message carries no ordering context.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
    pub timestamp_ms: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    /// Correlation id for log lines only; never interpreted.
    pub trace_id: Option<String>,
}

impl Message {
    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// Decoded payload envelope. `event_records` is kept as raw JSON values --
/// the ingester never interprets individual events, it only needs their
/// total byte size and the session/team routing keys.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecodedPayload {
    pub team_token: String,
    pub session_id: String,
    #[serde(default)]
    pub event_records: Vec<serde_json::Value>,
}

/// Decodes the JSON envelope out of a message payload.
///
/// Returns `IngestError::Decode` on malformed input; per spec §7 this is
/// never fatal to the batch -- the caller skips the message and still
/// advances `lastMessageOffset`.
pub fn decode_payload(payload: &[u8]) -> crate::error::Result<DecodedPayload> {
    serde_json::from_slice(payload).map_err(|e| crate::error::IngestError::Decode(e.to_string()))
}

/// A resolved team. `recording_enabled = false` teams are skipped but
/// still accounted toward partition offsets (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: u64,
    pub name: String,
    pub recording_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_payload() {
        let raw = br#"{"team_token":"tok","session_id":"sid1","event_records":[{"a":1}]}"#;
        let decoded = decode_payload(raw).unwrap();
        assert_eq!(decoded.team_token, "tok");
        assert_eq!(decoded.session_id, "sid1");
        assert_eq!(decoded.event_records.len(), 1);
    }

    #[test]
    fn missing_event_records_defaults_empty() {
        let raw = br#"{"team_token":"tok","session_id":"sid1"}"#;
        let decoded = decode_payload(raw).unwrap();
        assert!(decoded.event_records.is_empty());
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let raw = b"not json";
        let err = decode_payload(raw).unwrap_err();
        assert!(matches!(err, crate::error::IngestError::Decode(_)));
    }
}
