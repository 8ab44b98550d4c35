//! LSP wire framing: `Content-Length` header + JSON body.
//!
//! A [`tokio_util::codec`] `Decoder`/`Encoder` pair. `Framed<transport,
//! LspCodec>` gives buffering-across-reads and multiple-frames-per-read
//! handling for free, instead of hand-rolling a growable byte buffer.

use crate::error::ClientError;
use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Serializes `value` to JSON with keys sorted lexicographically at every
/// object level — a workaround `clangd` requires for certain orderings —
/// and wraps it in a `Content-Length` frame.
pub fn encode(value: &Value) -> Vec<u8> {
    let sorted = sort_keys(value.clone());
    let body = serde_json::to_vec(&sorted).expect("Value always serializes");
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(&body);
    out
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            for key in keys {
                let v = map[&key].clone();
                sorted.insert(key, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// `Decoder`/`Encoder` for the `Content-Length`-framed JSON-RPC stream.
#[derive(Debug, Default)]
pub struct LspCodec {
    content_length: Option<usize>,
}

impl Decoder for LspCodec {
    type Item = Value;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, ClientError> {
        loop {
            if self.content_length.is_none() {
                let Some(header_end) = find_subslice(src, HEADER_TERMINATOR) else {
                    // Guard against an unbounded header section.
                    if src.len() > 64 * 1024 {
                        return Err(ClientError::ProtocolFramingError(
                            "header section exceeded 64KiB without terminator".into(),
                        ));
                    }
                    return Ok(None);
                };

                let header_bytes = src.split_to(header_end);
                src.advance(HEADER_TERMINATOR.len());

                let headers = std::str::from_utf8(&header_bytes).map_err(|e| {
                    ClientError::ProtocolFramingError(format!("non-UTF8 header: {e}"))
                })?;

                let mut content_length = None;
                for line in headers.split("\r\n").filter(|l| !l.is_empty()) {
                    let Some((key, value)) = line.split_once(':') else {
                        return Err(ClientError::ProtocolFramingError(format!(
                            "malformed header line: {line:?}"
                        )));
                    };
                    if key.trim() == "Content-Length" {
                        content_length = Some(value.trim().parse::<usize>().map_err(|e| {
                            ClientError::ProtocolFramingError(format!(
                                "invalid Content-Length: {e}"
                            ))
                        })?);
                    }
                    // Unknown headers (e.g. Content-Type) are tolerated and discarded.
                }

                self.content_length = Some(content_length.ok_or_else(|| {
                    ClientError::ProtocolFramingError("missing Content-Length header".into())
                })?);
            }

            let len = self.content_length.expect("just set above");
            if src.len() < len {
                src.reserve(len - src.len());
                return Ok(None);
            }

            let body = src.split_to(len);
            self.content_length = None;

            let value: Value = serde_json::from_slice(&body)
                .map_err(|e| ClientError::ProtocolFramingError(format!("invalid JSON body: {e}")))?;
            return Ok(Some(value));
        }
    }
}

impl Encoder<Value> for LspCodec {
    type Error = ClientError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), ClientError> {
        let framed = encode(&item);
        dst.reserve(framed.len());
        dst.put_slice(&framed);
        Ok(())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_sorts_keys_at_every_level() {
        let value = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let framed = encode(&value);
        let framed_str = String::from_utf8(framed).unwrap();
        let body = framed_str.split("\r\n\r\n").nth(1).unwrap();
        assert_eq!(body, r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn decode_handles_partial_reads() {
        let mut codec = LspCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"Content-Length: 10\r\n\r\n{\"abc\":");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\"\"}");
        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value, json!({"abc": ""}));
    }

    #[test]
    fn decode_handles_multiple_frames_in_one_buffer() {
        let mut codec = LspCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&json!({"id":1})));
        buf.extend_from_slice(&encode(&json!({"id":2})));
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, json!({"id":1}));
        assert_eq!(second, json!({"id":2}));
    }

    #[test]
    fn decode_rejects_missing_content_length() {
        let mut codec = LspCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"Content-NOTLENGTH: 10\r\n\r\n{}");
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encode_decode_round_trip() {
        let value = json!({"jsonrpc":"2.0","id":1,"method":"initialize","params":{"a":1}});
        let mut codec = LspCodec::default();
        let mut buf = BytesMut::new();
        Encoder::encode(&mut codec, value.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, value);
    }
}
