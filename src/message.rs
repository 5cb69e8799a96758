use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A single unit of data moving from the outbox writer through to the
/// broker. Mirrors the wire-level `TransportMessage` shape: headers plus an
/// opaque payload, never a typed application value. Immutable once built by
/// the publisher — nothing downstream mutates a `Message` in place.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub stream_name: String,
    pub stream_key: Option<String>,
    pub headers: HashMap<String, String>,
    pub content_type: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
    /// Opaque decoded-form slot. Set by an application-level publisher that
    /// already has a typed domain event in hand and wants to avoid
    /// re-decoding `payload` downstream in the same process. Never
    /// serialized, never compared, never read by C2-C6 themselves.
    pub decoded: Option<Arc<dyn Any + Send + Sync>>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.stream_name == other.stream_name
            && self.stream_key == other.stream_key
            && self.headers == other.headers
            && self.content_type == other.content_type
            && self.payload == other.payload
            && self.published_at == other.published_at
    }
}

impl Message {
    pub fn new(stream_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stream_name: stream_name.into(),
            stream_key: None,
            headers: HashMap::new(),
            content_type: String::new(),
            payload,
            published_at: Utc::now(),
            decoded: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_decoded(mut self, decoded: Arc<dyn Any + Send + Sync>) -> Self {
        self.decoded = Some(decoded);
        self
    }
}

/// A group of messages written and forwarded together. An outbox write
/// always persists a whole batch atomically; a batch is never partially
/// visible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub messages: Vec<Message>,
}

impl Batch {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

impl From<Vec<Message>> for Batch {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// One row of the egress table: the durable record of a batch awaiting
/// forwarding. `raw_data` is the codec-encoded form of a [`Batch`].
#[derive(Debug, Clone)]
pub struct EgressRow {
    pub batch_id: String,
    pub message_count: i32,
    pub raw_data: Vec<u8>,
    pub insert_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_gets_a_fresh_id_and_timestamp() {
        let a = Message::new("orders.created", vec![1]);
        let b = Message::new("orders.created", vec![1]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn equality_ignores_the_decoded_slot() {
        let base = Message::new("orders.created", vec![1, 2, 3]);
        let mut with_decoded = base.clone();
        with_decoded.decoded = Some(Arc::new(42i32));

        assert_eq!(base, with_decoded);
    }
}
