use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Batch, Message};

/// Wire shape of a single [`Message`]. Kept as a concrete, closed struct
/// rather than a dynamically-typed envelope so codecs never need to branch
/// on arbitrary application types. Carries every `Message` field except the
/// in-process-only `decoded` slot, which never crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    pub id: String,
    pub stream_name: String,
    pub stream_key: Option<String>,
    pub headers: HashMap<String, String>,
    pub content_type: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

impl From<&Message> for TransportMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            stream_name: msg.stream_name.clone(),
            stream_key: msg.stream_key.clone(),
            headers: msg.headers.clone(),
            content_type: msg.content_type.clone(),
            payload: msg.payload.clone(),
            published_at: msg.published_at,
        }
    }
}

impl From<TransportMessage> for Message {
    fn from(t: TransportMessage) -> Self {
        Self {
            id: t.id,
            stream_name: t.stream_name,
            stream_key: t.stream_key,
            headers: t.headers,
            content_type: t.content_type,
            payload: t.payload,
            published_at: t.published_at,
            decoded: None,
        }
    }
}

/// Wire shape of a [`Batch`]: what actually gets encoded into an egress
/// row's `raw_data` column and decoded back out by the forwarder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessageBatch {
    pub messages: Vec<TransportMessage>,
}

impl From<&Batch> for TransportMessageBatch {
    fn from(batch: &Batch) -> Self {
        Self {
            messages: batch.messages.iter().map(TransportMessage::from).collect(),
        }
    }
}

impl From<TransportMessageBatch> for Batch {
    fn from(t: TransportMessageBatch) -> Self {
        Self {
            messages: t.messages.into_iter().map(Message::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_transport_preserving_id_and_timestamp() {
        let msg = Message::new("orders.created", vec![1, 2, 3]).with_key("order-1");
        let transport = TransportMessage::from(&msg);
        let back: Message = transport.into();

        assert_eq!(back.id, msg.id);
        assert_eq!(
            back.published_at.timestamp_millis(),
            msg.published_at.timestamp_millis()
        );
        assert_eq!(back.stream_key, msg.stream_key);
    }
}
