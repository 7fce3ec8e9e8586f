pub use app_error::{AppError, AppResult};
pub use gateway::Gateway;
pub use registry::SessionRegistry;
pub use self::config::{DispatcherConfig, NetworkConfig, ServerConfig, SessionConfig, TracingConfig};
pub use server::Server;
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing, TracingGuard};

mod app_error;
mod config;
mod gateway;
mod registry;
mod server;
mod shutdown;
mod tracing_config;
