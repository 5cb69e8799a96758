pub mod listener;
pub mod protocol;

pub use listener::{Wal, WalConfig, WalState};
