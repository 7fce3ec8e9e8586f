use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::handler::HandlerTable;
use crate::network::SessionRef;
use crate::AppResult;

pub const MSG_ECHO: u16 = 1;
pub const MSG_HELLO_WORLD: u16 = 1001;

/// JSON body of a hello world message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub id: i64,
    pub data: String,
}

/// Replies with the received body under the same message id.
pub fn echo(session: &SessionRef, message_id: u16, body: &Bytes) -> AppResult<()> {
    session.send(message_id, body.clone())
}

pub fn hello_world(session: &SessionRef, message_id: u16, body: &Bytes) -> AppResult<()> {
    let message: HelloMessage = serde_json::from_slice(body)?;
    info!(
        session_id = session.id(),
        id = message.id,
        data = %message.data,
        "hello world received"
    );
    session.send(message_id, serde_json::to_vec(&message)?)
}

pub fn default_handlers() -> HandlerTable {
    HandlerTable::builder()
        .register(MSG_ECHO, echo)
        .register(MSG_HELLO_WORLD, hello_world)
        .build()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Weak};

    use super::*;
    use crate::network::Session;
    use crate::service::SessionConfig;
    use crate::AppError;

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            3,
            "127.0.0.1:1".parse().unwrap(),
            &SessionConfig::default(),
            Weak::new(),
        ))
    }

    #[test]
    fn test_default_table() {
        let table = default_handlers();
        assert!(table.contains(MSG_ECHO));
        assert!(table.contains(MSG_HELLO_WORLD));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_echo_queues_reply() {
        let s = session();
        echo(&s.handle(), MSG_ECHO, &Bytes::from_static(br#"{"id":1,"data":"hi"}"#)).unwrap();
        assert_eq!(s.pending_frames(), 1);
    }

    #[test]
    fn test_hello_world_round_trips_json() {
        let s = session();
        let body = Bytes::from_static(br#"{"data":"hello world","id":1001}"#);
        hello_world(&s.handle(), MSG_HELLO_WORLD, &body).unwrap();
        assert_eq!(s.pending_frames(), 1);
    }

    #[test]
    fn test_hello_world_rejects_bad_json() {
        let s = session();
        let result = hello_world(&s.handle(), MSG_HELLO_WORLD, &Bytes::from_static(b"not json"));
        assert!(matches!(result, Err(AppError::MalformedPayload(_))));
        assert_eq!(s.pending_frames(), 0);
        assert!(!s.is_closed());
    }
}
