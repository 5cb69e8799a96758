pub mod binary;
pub mod json;
pub mod transport;

use crate::error::AppResult;
pub use transport::{TransportMessage, TransportMessageBatch};

/// Encodes/decodes a [`TransportMessageBatch`] to and from its wire form.
///
/// Unlike the Go original's `Encode(v any) ([]byte, error)`, this operates on
/// one concrete, closed type. There is nothing else a codec in this crate
/// ever needs to serialize, so the `any` + reflection-based dispatch the
/// source used has no reason to exist here.
pub trait Codec: Send + Sync {
    fn encode(&self, batch: &TransportMessageBatch) -> AppResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> AppResult<TransportMessageBatch>;
    fn application_type(&self) -> &'static str;
}

pub use binary::BinaryCodec;
pub use json::JsonCodec;
