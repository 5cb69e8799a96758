pub mod identifier;
pub mod storage;
pub mod writer;

pub use identifier::{default_identifier_factory, new_time_sortable_id, new_uuid, IdentifierFactory};
pub use storage::{EgressStorage, EgressStorageConfig};
pub use writer::{OutboxWriter, OutboxWriterConfig};
