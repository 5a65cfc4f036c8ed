use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Interval in seconds between server pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Extra grace in seconds after a missed ping before the connection is dropped
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    /// Capacity of each connection's outbound queue
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// When set, only connections presenting this token may upload or trigger
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_ping_interval() -> u64 {
    10
}

fn default_ping_timeout() -> u64 {
    5
}

fn default_channel_buffer() -> usize {
    64
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // RELAY_SERVER__HOST, RELAY_WEBSOCKET__PING_INTERVAL_SECS, RELAY_RELAY__ADMIN_TOKEN, ...
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            // Plain PORT wins over everything else
            .set_override_option("server.port", port_override()?)?;

        Self::from_builder(builder)
    }

    /// Build settings from an already assembled source stack
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.websocket.ping_interval_secs == 0 {
            return Err(ConfigError::Message(
                "websocket.ping_interval_secs must be greater than zero".into(),
            ));
        }
        if self.websocket.channel_buffer == 0 {
            return Err(ConfigError::Message(
                "websocket.channel_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketConfig {
    /// How long a connection may stay silent before it is considered dead
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs + self.ping_timeout_secs)
    }
}

fn port_override() -> Result<Option<i64>, ConfigError> {
    match env::var("PORT") {
        Ok(raw) => raw
            .trim()
            .parse::<u16>()
            .map(|port| Some(i64::from(port)))
            .map_err(|e| ConfigError::Message(format!("invalid PORT '{}': {}", raw, e))),
        Err(_) => Ok(None),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            channel_buffer: default_channel_buffer(),
        }
    }
}
