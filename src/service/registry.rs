use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::BufWriter;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::config::SessionConfig;
use super::{AppResult, Shutdown};
use crate::logic::DispatcherHandle;
use crate::network::{Session, SessionId};

/// Owner of every live session, keyed by a per-registry unique id.
///
/// Inserts happen on accept, removals on the close path of a session. The map
/// is sharded, unrelated sessions never contend on one lock.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    next_session_id: AtomicU64,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry {
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            config,
        })
    }

    /// Creates a session for `peer_addr` and inserts it under a fresh id.
    pub fn register(self: &Arc<Self>, peer_addr: SocketAddr) -> Arc<Session> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(
            session_id,
            peer_addr,
            &self.config,
            Arc::downgrade(self),
        ));
        let previous = self.sessions.insert(session_id, session.clone());
        debug_assert!(previous.is_none(), "session id {session_id} handed out twice");
        info!(
            monotonic_counter.accepted_sessions = 1_u64,
            session_id,
            peer = %peer_addr,
            "session registered"
        );
        session
    }

    /// Registers a freshly accepted TCP connection and starts its receive path.
    pub fn accept<G>(
        self: &Arc<Self>,
        socket: TcpStream,
        dispatcher: DispatcherHandle,
        shutdown: Shutdown,
        guard: G,
    ) -> AppResult<Arc<Session>>
    where
        G: Send + 'static,
    {
        let peer_addr = socket.peer_addr()?;
        socket.set_nodelay(true)?;
        let session = self.register(peer_addr);
        let (reader, writer) = socket.into_split();
        session.start(reader, BufWriter::new(writer), dispatcher, shutdown, guard);
        Ok(session)
    }

    /// Forgets a session. Removing an unknown or already removed id is a no-op.
    pub fn remove(&self, session_id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&session_id).map(|(_, session)| session);
        if removed.is_some() {
            debug!(session_id, remaining = self.sessions.len(), "session removed");
        }
        removed
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Closes every live session, returns how many were closed by this call.
    pub fn close_all(&self) -> usize {
        // close() removes from the map, so no shard guard may be held meanwhile
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.iter().filter(|session| session.close()).count()
    }
}
