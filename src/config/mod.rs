pub mod app;

pub use app::{
    AgentConfig, AppConfig, CodecChoice, ForwarderSettings, LoggingConfig, MetricsSettings,
    PostgresConfig, WalSettings,
};
