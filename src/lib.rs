pub mod agent;
pub mod bus;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod forwarder;
pub mod message;
pub mod outbox;
pub mod prometheus;
pub mod wal;

pub use error::{AppError, AppResult};
pub use message::{Batch, EgressRow, Message};
