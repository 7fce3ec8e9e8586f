mod logic;
mod network;
mod service;

pub use logic::{
    default_handlers, echo, hello_world, DispatchItem, DispatchStats, Dispatcher,
    DispatcherHandle, Handler, HandlerTable, HandlerTableBuilder, HelloMessage, MSG_ECHO,
    MSG_HELLO_WORLD,
};
pub use network::{
    Connection, Decoded, FrameCodec, FrameHeader, IncomingFrame, OutgoingFrame, Session, SessionId,
    SessionRef, DEFAULT_MAX_BODY_LEN, HEADER_LEN,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, DispatcherConfig, Gateway,
    NetworkConfig, Server, ServerConfig, SessionConfig, SessionRegistry, Shutdown,
    TracingConfig, TracingGuard,
};
