//! Key encoding for RocksDB column families.
//!
//! All numeric values use big-endian encoding for correct lexicographic ordering.
//! Composite keys use `:` (0x3A) as separator.
//! Variable-length strings are length-prefixed with a big-endian u16.

use crate::message::MessageId;

const SEPARATOR: u8 = b':';

/// Encode a u64 as 8 big-endian bytes.
fn encode_u64(val: u64) -> [u8; 8] {
    val.to_be_bytes()
}

/// Encode a variable-length string with a 2-byte big-endian length prefix.
/// Strings longer than 64 KiB are truncated; topic and worker names are far shorter.
fn encode_string(s: &str) -> Vec<u8> {
    let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
    let len = bytes.len() as u16;
    let mut buf = Vec::with_capacity(2 + bytes.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    buf
}

/// Decode a length-prefixed string at the start of `buf`.
/// Returns the string and the number of bytes consumed.
fn decode_string(buf: &[u8]) -> Option<(String, usize)> {
    let len_bytes: [u8; 2] = buf.get(..2)?.try_into().ok()?;
    let len = u16::from_be_bytes(len_bytes) as usize;
    let raw = buf.get(2..2 + len)?;
    let s = String::from_utf8(raw.to_vec()).ok()?;
    Some((s, 2 + len))
}

/// Build a message key: `{topic}:{msg_id}`
///
/// The 16-byte UUIDv7 suffix keeps messages of one topic in creation order.
pub fn message_key(topic: &str, msg_id: &MessageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&encode_string(topic));
    key.push(SEPARATOR);
    key.extend_from_slice(msg_id.as_bytes());
    key
}

/// Build a prefix for iterating all messages in a topic.
pub fn message_prefix(topic: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(24);
    prefix.extend_from_slice(&encode_string(topic));
    prefix.push(SEPARATOR);
    prefix
}

/// Build a task-results key. Same layout as the message key, different column family.
pub fn results_key(topic: &str, msg_id: &MessageId) -> Vec<u8> {
    message_key(topic, msg_id)
}

/// Build an assignment key: `{worker_id}:{topic}:{msg_id}`
///
/// Worker-first layout makes "all assignments of a worker" a prefix scan.
pub fn assignment_key(worker_id: &str, topic: &str, msg_id: &MessageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(48);
    key.extend_from_slice(&encode_string(worker_id));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_string(topic));
    key.push(SEPARATOR);
    key.extend_from_slice(msg_id.as_bytes());
    key
}

/// Build a prefix for iterating all assignments held by a worker.
pub fn assignment_prefix(worker_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(24);
    prefix.extend_from_slice(&encode_string(worker_id));
    prefix.push(SEPARATOR);
    prefix
}

/// Build an assignment expiry key: `{topic}:{assigned_at_ns}:{msg_id}`
///
/// Topic-then-timestamp layout lets each topic scan its own oldest
/// assignments first and stop at its deadline.
pub fn assignment_expiry_key(topic: &str, assigned_at_ns: u64, msg_id: &MessageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(48);
    key.extend_from_slice(&encode_string(topic));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_u64(assigned_at_ns));
    key.push(SEPARATOR);
    key.extend_from_slice(msg_id.as_bytes());
    key
}

/// Build a prefix for iterating the assignment expiry index of a topic.
pub fn assignment_expiry_prefix(topic: &str) -> Vec<u8> {
    message_prefix(topic)
}

/// Parse an assignment expiry key back into `(topic, assigned_at_ns, msg_id)`.
pub fn parse_assignment_expiry_key(key: &[u8]) -> Option<(String, u64, MessageId)> {
    let (topic, mut pos) = decode_string(key)?;
    if *key.get(pos)? != SEPARATOR {
        return None;
    }
    pos += 1;
    let ts_bytes: [u8; 8] = key.get(pos..pos + 8)?.try_into().ok()?;
    pos += 8;
    if *key.get(pos)? != SEPARATOR {
        return None;
    }
    pos += 1;
    let id_bytes: [u8; 16] = key.get(pos..pos + 16)?.try_into().ok()?;
    if key.len() != pos + 16 {
        return None;
    }
    Some((
        topic,
        u64::from_be_bytes(ts_bytes),
        MessageId::from_bytes(id_bytes),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_u64_lexicographic_order() {
        let small = encode_u64(100);
        let large = encode_u64(200);
        assert!(small < large, "100 should sort before 200 in big-endian");

        let zero = encode_u64(0);
        let max = encode_u64(u64::MAX);
        assert!(zero < max, "0 should sort before MAX");
    }

    #[test]
    fn message_keys_sort_by_topic_then_id() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();

        let k1 = message_key("jobs", &id1);
        let k2 = message_key("jobs", &id2);
        assert!(k1 < k2, "earlier id should sort first");

        let ka = message_key("a", &id2);
        let kb = message_key("b", &id1);
        assert!(ka < kb, "topic 'a' should sort before 'b'");
    }

    #[test]
    fn message_prefix_is_prefix_of_message_key() {
        let id = MessageId::new();
        let key = message_key("jobs", &id);
        assert!(key.starts_with(&message_prefix("jobs")));
        assert!(!key.starts_with(&message_prefix("job")));
    }

    #[test]
    fn assignment_prefix_is_prefix_of_assignment_key() {
        let id = MessageId::new();
        let key = assignment_key("worker-1", "jobs", &id);
        assert!(key.starts_with(&assignment_prefix("worker-1")));
        assert!(!key.starts_with(&assignment_prefix("worker-10")));
    }

    #[test]
    fn expiry_keys_sort_by_timestamp_within_topic() {
        let id = MessageId::new();
        let early = assignment_expiry_key("jobs", 1000, &id);
        let late = assignment_expiry_key("jobs", 2000, &id);
        assert!(early < late, "earlier assignment should sort first");
        assert!(early.starts_with(&assignment_expiry_prefix("jobs")));
    }

    #[test]
    fn expiry_key_parses_back() {
        let id = MessageId::new();
        let key = assignment_expiry_key("jobs", 42, &id);
        let (topic, ts, parsed) = parse_assignment_expiry_key(&key).unwrap();
        assert_eq!(topic, "jobs");
        assert_eq!(ts, 42);
        assert_eq!(parsed, id);
    }

    #[test]
    fn truncated_expiry_key_does_not_parse() {
        let id = MessageId::new();
        let key = assignment_expiry_key("jobs", 42, &id);
        assert!(parse_assignment_expiry_key(&key[..key.len() - 1]).is_none());
        assert!(parse_assignment_expiry_key(b"").is_none());
    }

    #[test]
    fn different_length_strings_dont_collide() {
        let id = MessageId::new();
        let k1 = message_key("a", &id);
        let k2 = message_key("ab", &id);
        assert_ne!(k1, k2);
    }
}
