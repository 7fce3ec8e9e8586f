use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tracing::warn;

use crate::network::SessionRef;
use crate::AppResult;

/// Application logic bound to one message id.
///
/// Handlers run on the dispatcher thread one after another, a reply goes
/// through `session.send`, which never blocks.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, session: &SessionRef, message_id: u16, body: &Bytes) -> AppResult<()>;
}

impl<F> Handler for F
where
    F: Fn(&SessionRef, u16, &Bytes) -> AppResult<()> + Send + Sync + 'static,
{
    fn handle(&self, session: &SessionRef, message_id: u16, body: &Bytes) -> AppResult<()> {
        self(session, message_id, body)
    }
}

/// Immutable mapping from message id to handler, built once at startup.
pub struct HandlerTable {
    handlers: HashMap<u16, Box<dyn Handler>>,
}

impl HandlerTable {
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::default()
    }

    pub fn get(&self, message_id: u16) -> Option<&dyn Handler> {
        self.handlers.get(&message_id).map(|handler| handler.as_ref())
    }

    pub fn contains(&self, message_id: u16) -> bool {
        self.handlers.contains_key(&message_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("HandlerTable")
            .field("message_ids", &ids)
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerTableBuilder {
    handlers: HashMap<u16, Box<dyn Handler>>,
}

impl HandlerTableBuilder {
    /// Registers `handler` for `message_id`, a later registration replaces an earlier one.
    pub fn register<H: Handler>(mut self, message_id: u16, handler: H) -> Self {
        if self
            .handlers
            .insert(message_id, Box::new(handler))
            .is_some()
        {
            warn!(message_id, "handler registered twice, keeping the last one");
        }
        self
    }

    pub fn build(self) -> HandlerTable {
        HandlerTable {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Weak};

    use super::*;
    use crate::network::Session;
    use crate::service::SessionConfig;

    #[test]
    fn test_lookup_by_message_id() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let table = HandlerTable::builder()
            .register(1, move |_: &SessionRef, _: u16, _: &Bytes| -> AppResult<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build();

        assert_eq!(table.len(), 1);
        assert!(table.contains(1));
        assert!(table.get(2).is_none());

        let session = Arc::new(Session::new(
            1,
            "127.0.0.1:1".parse().unwrap(),
            &SessionConfig::default(),
            Weak::new(),
        ));
        let handler = table.get(1).unwrap();
        handler.handle(&session.handle(), 1, &Bytes::new()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_registration_wins() {
        let table = HandlerTable::builder()
            .register(5, |_: &SessionRef, _: u16, _: &Bytes| -> AppResult<()> { Ok(()) })
            .register(5, |_: &SessionRef, id: u16, _: &Bytes| -> AppResult<()> {
                Err(crate::AppError::UnknownMessageId(id))
            })
            .build();
        assert_eq!(table.len(), 1);

        let session = Arc::new(Session::new(
            1,
            "127.0.0.1:1".parse().unwrap(),
            &SessionConfig::default(),
            Weak::new(),
        ));
        let result = table.get(5).unwrap().handle(&session.handle(), 5, &Bytes::new());
        assert!(result.is_err());
        assert_eq!(format!("{:?}", table), "HandlerTable { message_ids: [5] }");
    }
}
