mod settings;

pub use settings::{LogFormat, LoggingConfig, RelayConfig, ServerConfig, Settings, WebSocketConfig};
