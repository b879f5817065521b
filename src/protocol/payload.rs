//! NUL-separated payload encoding, shared by every transport (spec §6.3).
//!
//! - ADD payload: `user\0 room\0 message\0 (topic\0)*`
//! - QUERY payload: `room\0 (topic\0)*`
//! - INIT payload: `user\0 room\0`

use crate::error::PayloadError;

fn push_field(buf: &mut Vec<u8>, field: &str) {
    buf.extend_from_slice(field.as_bytes());
    buf.push(0);
}

/// Split a NUL-separated byte payload into UTF-8 fields. The trailing NUL is
/// not a field delimiter for a phantom empty final field: every field,
/// including the last, is terminated by exactly one NUL.
fn split_fields(payload: &[u8]) -> Result<Vec<String>, PayloadError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    payload
        .split(|&b| b == 0)
        .filter(|chunk| !(chunk.is_empty() && is_trailing_empty(payload)))
        .map(|chunk| String::from_utf8(chunk.to_vec()).map_err(|_| PayloadError::NotUtf8))
        .collect()
}

/// `payload.split(0)` yields a trailing empty slice when the payload ends in
/// a NUL (as every encoded field does); drop just that one artifact.
fn is_trailing_empty(payload: &[u8]) -> bool {
    payload.last() == Some(&0)
}

pub fn encode_add(user: &str, room: &str, message: &str, topics: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user.len() + room.len() + message.len() + 16);
    push_field(&mut buf, user);
    push_field(&mut buf, room);
    push_field(&mut buf, message);
    for t in topics {
        push_field(&mut buf, t);
    }
    buf
}

pub struct AddPayload {
    pub user: String,
    pub room: String,
    pub message: String,
    pub topics: Vec<String>,
}

pub fn decode_add(payload: &[u8]) -> Result<AddPayload, PayloadError> {
    let mut fields = split_fields(payload)?.into_iter();
    let user = fields
        .next()
        .ok_or(PayloadError::FieldCount { expected: 3, found: 0 })?;
    let room = fields
        .next()
        .ok_or(PayloadError::FieldCount { expected: 3, found: 1 })?;
    let message = fields
        .next()
        .ok_or(PayloadError::FieldCount { expected: 3, found: 2 })?;
    let topics: Vec<String> = fields.collect();
    Ok(AddPayload {
        user,
        room,
        message,
        topics,
    })
}

pub fn encode_query(room: &str, topics: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(room.len() + 16);
    push_field(&mut buf, room);
    for t in topics {
        push_field(&mut buf, t);
    }
    buf
}

pub struct QueryPayload {
    pub room: String,
    pub topics: Vec<String>,
}

pub fn decode_query(payload: &[u8]) -> Result<QueryPayload, PayloadError> {
    let mut fields = split_fields(payload)?.into_iter();
    let room = fields
        .next()
        .ok_or(PayloadError::FieldCount { expected: 1, found: 0 })?;
    let topics: Vec<String> = fields.collect();
    Ok(QueryPayload { room, topics })
}

pub fn encode_init(user: &str, room: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user.len() + room.len() + 2);
    push_field(&mut buf, user);
    push_field(&mut buf, room);
    buf
}

pub struct InitPayload {
    pub user: String,
    pub room: String,
}

pub fn decode_init(payload: &[u8]) -> Result<InitPayload, PayloadError> {
    let mut fields = split_fields(payload)?.into_iter();
    let user = fields
        .next()
        .ok_or(PayloadError::FieldCount { expected: 2, found: 0 })?;
    let room = fields
        .next()
        .ok_or(PayloadError::FieldCount { expected: 2, found: 1 })?;
    Ok(InitPayload { user, room })
}

/// Deduplicate topics case-insensitively, preserving first-occurrence order
/// and lower-casing each. Mirrors the original's dedup-on-add behavior
/// (spec §9 Open Question).
pub fn dedup_topics(topics: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(topics.len());
    for t in topics {
        let lower = t.to_lowercase();
        if seen.insert(lower.clone()) {
            out.push(lower);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_payload_round_trips() {
        let topics = vec!["db".to_string(), "sqlite".to_string()];
        let bytes = encode_add("@zdu", "sysprog", "sqlite is pretty cool", &topics);
        let decoded = decode_add(&bytes).unwrap();
        assert_eq!(decoded.user, "@zdu");
        assert_eq!(decoded.room, "sysprog");
        assert_eq!(decoded.message, "sqlite is pretty cool");
        assert_eq!(decoded.topics, topics);
    }

    #[test]
    fn add_payload_preserves_embedded_newlines_and_whitespace() {
        let message = "  leading and trailing  \nwith an embedded newline\n";
        let bytes = encode_add("@zdu", "sysprog", message, &[]);
        let decoded = decode_add(&bytes).unwrap();
        assert_eq!(decoded.message, message);
    }

    #[test]
    fn query_payload_round_trips_with_no_topics() {
        let bytes = encode_query("sysprog", &[]);
        let decoded = decode_query(&bytes).unwrap();
        assert_eq!(decoded.room, "sysprog");
        assert!(decoded.topics.is_empty());
    }

    #[test]
    fn init_payload_round_trips() {
        let bytes = encode_init("@a", "sysprog");
        let decoded = decode_init(&bytes).unwrap();
        assert_eq!(decoded.user, "@a");
        assert_eq!(decoded.room, "sysprog");
    }

    #[test]
    fn dedup_topics_preserves_first_occurrence_case_insensitively() {
        let topics = vec![
            "DB".to_string(),
            "sqlite".to_string(),
            "db".to_string(),
            "SQLite".to_string(),
        ];
        assert_eq!(dedup_topics(&topics), vec!["db".to_string(), "sqlite".to_string()]);
    }
}
