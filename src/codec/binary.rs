use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{AppError, AppResult};

use super::{Codec, TransportMessage, TransportMessageBatch};

pub const BINARY_APPLICATION_TYPE: &str = "application/x-outbox-binary";

/// Default codec: a simple length-prefixed binary framing. Chosen over JSON
/// as the default because the egress table's `raw_data` column is never
/// queried or indexed, only round-tripped, so there is no benefit to a
/// human-readable format on the hot path.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub fn new() -> Self {
        Self
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn take_bytes(buf: &mut &[u8]) -> AppResult<Vec<u8>> {
    if buf.len() < 4 {
        return Err(AppError::Codec("truncated length prefix".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.len() < len {
        return Err(AppError::Codec("truncated frame body".into()));
    }
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

fn take_string(buf: &mut &[u8]) -> AppResult<String> {
    let bytes = take_bytes(buf)?;
    String::from_utf8(bytes).map_err(|e| AppError::Codec(format!("invalid utf-8: {e}")))
}

/// Round-trip law compares timestamps "to ms" (`spec.md` §8), so the wire
/// form only needs millisecond resolution.
fn put_timestamp(buf: &mut BytesMut, ts: DateTime<Utc>) {
    buf.put_i64(ts.timestamp_millis());
}

fn take_timestamp(buf: &mut &[u8]) -> AppResult<DateTime<Utc>> {
    if buf.len() < 8 {
        return Err(AppError::Codec("truncated timestamp".into()));
    }
    let millis = buf.get_i64();
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| AppError::Codec(format!("out-of-range timestamp millis: {millis}")))
}

impl Codec for BinaryCodec {
    fn encode(&self, batch: &TransportMessageBatch) -> AppResult<Vec<u8>> {
        let mut buf = BytesMut::new();
        buf.put_u32(batch.messages.len() as u32);

        for msg in &batch.messages {
            put_bytes(&mut buf, msg.id.as_bytes());
            put_bytes(&mut buf, msg.stream_name.as_bytes());

            match &msg.stream_key {
                Some(key) => {
                    buf.put_u8(1);
                    put_bytes(&mut buf, key.as_bytes());
                }
                None => buf.put_u8(0),
            }

            put_bytes(&mut buf, msg.content_type.as_bytes());

            buf.put_u32(msg.headers.len() as u32);
            for (k, v) in &msg.headers {
                put_bytes(&mut buf, k.as_bytes());
                put_bytes(&mut buf, v.as_bytes());
            }

            put_bytes(&mut buf, &msg.payload);
            put_timestamp(&mut buf, msg.published_at);
        }

        Ok(buf.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> AppResult<TransportMessageBatch> {
        let mut cursor = bytes;
        if cursor.len() < 4 {
            return Err(AppError::Codec("truncated batch header".into()));
        }
        let count = cursor.get_u32();

        let mut messages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = take_string(&mut cursor)?;
            let stream_name = take_string(&mut cursor)?;

            if cursor.is_empty() {
                return Err(AppError::Codec("truncated stream key flag".into()));
            }
            let has_key = cursor.get_u8();
            let stream_key = if has_key == 1 {
                Some(take_string(&mut cursor)?)
            } else {
                None
            };

            let content_type = take_string(&mut cursor)?;

            if cursor.len() < 4 {
                return Err(AppError::Codec("truncated header count".into()));
            }
            let header_count = cursor.get_u32();
            let mut headers = std::collections::HashMap::with_capacity(header_count as usize);
            for _ in 0..header_count {
                let k = take_string(&mut cursor)?;
                let v = take_string(&mut cursor)?;
                headers.insert(k, v);
            }

            let payload = take_bytes(&mut cursor)?;
            let published_at = take_timestamp(&mut cursor)?;

            messages.push(TransportMessage {
                id,
                stream_name,
                stream_key,
                headers,
                content_type,
                payload,
                published_at,
            });
        }

        Ok(TransportMessageBatch { messages })
    }

    fn application_type(&self) -> &'static str {
        BINARY_APPLICATION_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_batch() -> TransportMessageBatch {
        let mut headers = HashMap::new();
        headers.insert("trace-id".to_string(), "abc123".to_string());
        let published_at = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap();

        TransportMessageBatch {
            messages: vec![
                TransportMessage {
                    id: "msg-1".into(),
                    stream_name: "orders.created".into(),
                    stream_key: Some("order-1".into()),
                    headers,
                    content_type: "application/json".into(),
                    payload: b"{\"ok\":true}".to_vec(),
                    published_at,
                },
                TransportMessage {
                    id: "msg-2".into(),
                    stream_name: "orders.created".into(),
                    stream_key: None,
                    headers: HashMap::new(),
                    content_type: String::new(),
                    payload: vec![],
                    published_at,
                },
            ],
        }
    }

    #[test]
    fn round_trips_a_batch() {
        let codec = BinaryCodec::new();
        let batch = sample_batch();

        let encoded = codec.encode(&batch).unwrap();
        let decoded = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, batch);
    }

    #[test]
    fn round_trips_an_empty_batch() {
        let codec = BinaryCodec::new();
        let batch = TransportMessageBatch::default();

        let encoded = codec.encode(&batch).unwrap();
        let decoded = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, batch);
    }

    #[test]
    fn rejects_truncated_input() {
        let codec = BinaryCodec::new();
        let batch = sample_batch();
        let encoded = codec.encode(&batch).unwrap();

        let truncated = &encoded[..encoded.len() - 3];
        assert!(codec.decode(truncated).is_err());
    }

    #[test]
    fn application_type_is_stable() {
        assert_eq!(BinaryCodec::new().application_type(), BINARY_APPLICATION_TYPE);
    }
}
