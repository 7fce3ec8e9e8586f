pub use dispatcher::{DispatchItem, DispatchStats, Dispatcher, DispatcherHandle};
pub use handler::{Handler, HandlerTable, HandlerTableBuilder};
pub use handlers::{default_handlers, echo, hello_world, HelloMessage, MSG_ECHO, MSG_HELLO_WORLD};

mod dispatcher;
mod handler;
mod handlers;
