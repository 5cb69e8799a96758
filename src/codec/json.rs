use crate::error::AppResult;

use super::{Codec, TransportMessageBatch};

pub const JSON_APPLICATION_TYPE: &str = "application/json";

/// Alternate codec, useful for debugging an egress table by hand or for
/// environments that would rather pay JSON's size cost for readability.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn encode(&self, batch: &TransportMessageBatch) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(batch)?)
    }

    fn decode(&self, bytes: &[u8]) -> AppResult<TransportMessageBatch> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn application_type(&self) -> &'static str {
        JSON_APPLICATION_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TransportMessage;
    use chrono::Utc;
    use std::collections::HashMap;

    #[test]
    fn round_trips_a_batch() {
        let codec = JsonCodec::new();
        let batch = TransportMessageBatch {
            messages: vec![TransportMessage {
                id: "msg-1".into(),
                stream_name: "orders.created".into(),
                stream_key: Some("order-1".into()),
                headers: HashMap::new(),
                content_type: "application/json".into(),
                payload: b"{}".to_vec(),
                published_at: Utc::now(),
            }],
        };

        let encoded = codec.encode(&batch).unwrap();
        let decoded = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, batch);
    }

    #[test]
    fn rejects_malformed_json() {
        let codec = JsonCodec::new();
        assert!(codec.decode(b"not json").is_err());
    }
}
