pub mod forwarder;
pub mod middleware;
pub mod retry;

pub use forwarder::{BrokerWriter, ForwardJob, Forwarder, ForwarderConfig};
pub use retry::{RetryPolicy, RETRY_JITTER_FACTOR};
