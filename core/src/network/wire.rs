//! Batch wire format
//!
//! Messages travel between snodes as a flat concatenation of field frames:
//! `[u32 BE length][bytes]` per field, fields in the order `recipient, data,
//! hash, ttl, timestamp, nonce`, one message after another. Integer fields
//! are 8-byte big-endian inside their frame. Readers stop at the end of the
//! buffer; a truncated or malformed trailing entry is dropped without
//! affecting the messages before it.

use crate::node::types::Message;

/// Errors when decoding a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Input ends inside a frame
    Truncated,
    /// Field content is not valid for its type
    BadField,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Truncated => write!(f, "truncated frame"),
            WireError::BadField => write!(f, "malformed field"),
        }
    }
}

impl std::error::Error for WireError {}

fn put_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn take_field<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], WireError> {
    if buf.len() < 4 {
        return Err(WireError::Truncated);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return Err(WireError::Truncated);
    }
    let field = &buf[4..4 + len];
    *buf = &buf[4 + len..];
    Ok(field)
}

fn take_u64(buf: &mut &[u8]) -> Result<u64, WireError> {
    let field = take_field(buf)?;
    let bytes: [u8; 8] = field.try_into().map_err(|_| WireError::BadField)?;
    Ok(u64::from_be_bytes(bytes))
}

fn take_string(buf: &mut &[u8]) -> Result<String, WireError> {
    let field = take_field(buf)?;
    String::from_utf8(field.to_vec()).map_err(|_| WireError::BadField)
}

/// Append one message to a batch buffer.
pub fn serialize_message(out: &mut Vec<u8>, msg: &Message) {
    put_field(out, msg.pub_key.as_bytes());
    put_field(out, &msg.data);
    put_field(out, msg.hash.as_bytes());
    put_field(out, &msg.ttl.to_be_bytes());
    put_field(out, &msg.timestamp.to_be_bytes());
    put_field(out, msg.nonce.as_bytes());
}

/// Serialize a batch of messages.
pub fn serialize_messages(messages: &[Message]) -> Vec<u8> {
    let mut out = Vec::new();
    for msg in messages {
        serialize_message(&mut out, msg);
    }
    out
}

/// Decode one message from the front of `buf`, advancing it.
fn deserialize_one(buf: &mut &[u8]) -> Result<Message, WireError> {
    Ok(Message {
        pub_key: take_string(buf)?,
        data: take_field(buf)?.to_vec(),
        hash: take_string(buf)?,
        ttl: take_u64(buf)?,
        timestamp: take_u64(buf)?,
        nonce: take_string(buf)?,
    })
}

/// Decode a batch. Stops at buffer end; a malformed entry ends the scan but
/// keeps everything decoded before it.
pub fn deserialize_messages(mut buf: &[u8]) -> Vec<Message> {
    let mut messages = Vec::new();
    while !buf.is_empty() {
        match deserialize_one(&mut buf) {
            Ok(msg) => messages.push(msg),
            Err(_) => break,
        }
    }
    messages
}
