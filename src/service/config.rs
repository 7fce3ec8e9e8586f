use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Largest body the 16 bit length field can describe.
const WIRE_MAX_BODY_LEN: usize = u16::MAX as usize;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 8888,
            max_connection: 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on the body length a peer may declare in a header.
    pub max_body_len: usize,
    /// Maximum number of encoded frames waiting in one session's outbound queue.
    pub max_send_queue: usize,
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_body_len: 2046,
            max_send_queue: 1000,
            read_buffer_size: 4 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatcherConfig {
    pub channel_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            channel_capacity: 10_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TracingConfig {
    pub log_dir: String,
    pub log_file: String,
    /// When set, spans and metrics are exported to this OTLP collector.
    pub otlp_endpoint: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            log_dir: "logs".to_string(),
            log_file: "framelink.log".to_string(),
            otlp_endpoint: None,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub dispatcher: DispatcherConfig,
    pub tracing: TracingConfig,
}

impl ServerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ServerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = ::config::Config::builder()
            .add_source(::config::File::with_name(path_str))
            .add_source(
                ::config::Environment::with_prefix("FRAMELINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.session.max_body_len > WIRE_MAX_BODY_LEN {
            return Err(AppError::InvalidValue(format!(
                "session.max_body_len {} exceeds the wire limit {}",
                self.session.max_body_len, WIRE_MAX_BODY_LEN
            )));
        }
        if self.session.max_send_queue == 0 {
            return Err(AppError::InvalidValue(
                "session.max_send_queue must be greater than 0".to_string(),
            ));
        }
        if self.session.read_buffer_size == 0 {
            return Err(AppError::InvalidValue(
                "session.read_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.dispatcher.channel_capacity == 0 {
            return Err(AppError::InvalidValue(
                "dispatcher.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.network.max_connection == 0 {
            return Err(AppError::InvalidValue(
                "network.max_connection must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.ip, self.network.port)
    }
}
