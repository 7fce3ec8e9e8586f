use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::codec::FrameCodec;
use super::connection::Connection;
use super::frame::OutgoingFrame;
use crate::logic::{DispatchItem, DispatcherHandle};
use crate::service::{SessionConfig, SessionRegistry};
use crate::{AppError, AppResult, Shutdown};

pub type SessionId = u64;

/// Outbound state, private to one session and guarded by its own lock.
#[derive(Debug, Default)]
struct SendState {
    /// encoded frames in `send()` order, the front one is being written
    queue: VecDeque<Bytes>,
    send_in_flight: bool,
}

/// Per connection state: the outbound queue plus the tasks driving the transport.
///
/// The registry holds the only long lived strong reference. The reader and
/// writer tasks hold their own handle for as long as they run, dispatch items
/// and handlers only see a [`SessionRef`].
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    max_body_len: usize,
    max_send_queue: usize,
    read_buffer_size: usize,
    send_state: Mutex<SendState>,
    write_ready: Notify,
    closed: AtomicBool,
    cancel: CancellationToken,
    registry: Weak<SessionRegistry>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        config: &SessionConfig,
        registry: Weak<SessionRegistry>,
    ) -> Session {
        Session {
            id,
            peer_addr,
            max_body_len: config.max_body_len,
            max_send_queue: config.max_send_queue,
            read_buffer_size: config.read_buffer_size,
            send_state: Mutex::new(SendState::default()),
            write_ready: Notify::new(),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            registry,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames queued for writing, including the one currently being written.
    pub fn pending_frames(&self) -> usize {
        self.send_state.lock().queue.len()
    }

    pub fn is_send_in_flight(&self) -> bool {
        self.send_state.lock().send_in_flight
    }

    pub fn handle(self: &Arc<Self>) -> SessionRef {
        SessionRef {
            id: self.id,
            session: Arc::downgrade(self),
        }
    }

    /// Encodes a frame and appends it to the outbound queue.
    ///
    /// Never blocks. Sends into a closed session are dropped silently. When the
    /// queue is full the new message is dropped and `QueueOverflow` returned,
    /// the session stays open.
    pub fn send(&self, message_id: u16, body: impl Into<Bytes>) -> AppResult<()> {
        let frame = OutgoingFrame::new(message_id, body.into(), self.max_body_len)?;

        let mut state = self.send_state.lock();
        if self.is_closed() {
            trace!(session_id = self.id, message_id, "session closed, message dropped");
            return Ok(());
        }
        if state.queue.len() >= self.max_send_queue {
            warn!(
                session_id = self.id,
                message_id,
                limit = self.max_send_queue,
                "outbound queue full, dropping newest message"
            );
            return Err(AppError::QueueOverflow {
                session_id: self.id,
                limit: self.max_send_queue,
            });
        }
        state.queue.push_back(frame.encode());
        if state.send_in_flight {
            // the writer picks it up once the frames ahead of it are written
            return Ok(());
        }
        state.send_in_flight = true;
        drop(state);

        self.write_ready.notify_one();
        Ok(())
    }

    fn front_frame(&self) -> Option<Bytes> {
        self.send_state.lock().queue.front().cloned()
    }

    /// Pops the frame that was just written, returns whether more are waiting.
    fn complete_write(&self) -> bool {
        let mut state = self.send_state.lock();
        state.queue.pop_front();
        if state.queue.is_empty() {
            state.send_in_flight = false;
            false
        } else {
            true
        }
    }

    /// Closes the session and asks the registry to forget it.
    ///
    /// Safe to call from any number of paths, only the first call has an
    /// effect and returns `true`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        let discarded = {
            let mut state = self.send_state.lock();
            let discarded = state.queue.len();
            state.queue.clear();
            state.send_in_flight = false;
            discarded
        };
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        info!(
            session_id = self.id,
            peer = %self.peer_addr,
            discarded,
            "session closed"
        );
        true
    }

    /// Spawns the reader and writer tasks of this session.
    ///
    /// `guard` is held until both tasks have finished, the server uses it to
    /// keep a connection permit and the shutdown completion sender alive.
    pub fn start<R, W, G>(
        self: &Arc<Self>,
        reader: R,
        writer: W,
        dispatcher: DispatcherHandle,
        shutdown: Shutdown,
        guard: G,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        G: Send + 'static,
    {
        let connection = Connection::new(
            reader,
            FrameCodec::new(self.max_body_len),
            self.read_buffer_size,
        );
        let reader_task = tokio::spawn(self.clone().read_loop(connection, dispatcher, shutdown));
        let writer_task = tokio::spawn(self.clone().write_loop(writer));

        let session = self.clone();
        tokio::spawn(async move {
            let (read_result, write_result) = tokio::join!(reader_task, writer_task);
            for result in [read_result, write_result] {
                if let Err(join_error) = result {
                    error!(session_id = session.id, "session task failed: {join_error}");
                }
            }
            // a panicked task must not leave the session registered
            session.close();
            // whether gracefully or unexpectedly closed, release connection
            drop(guard);
            debug!(session_id = session.id, "session tasks finished");
        });
    }

    async fn read_loop<R>(
        self: Arc<Self>,
        mut connection: Connection<R>,
        dispatcher: DispatcherHandle,
        mut shutdown: Shutdown,
    ) where
        R: AsyncRead + Unpin,
    {
        loop {
            let maybe_frames = tokio::select! {
                res = connection.read_frames() => res,
                _ = self.cancel.cancelled() => return,
                _ = shutdown.recv() => {
                    debug!(session_id = self.id, "session reader received shutdown signal");
                    self.close();
                    return;
                }
            };

            let frames = match maybe_frames {
                Ok(Some(frames)) => frames,
                Ok(None) => {
                    debug!(session_id = self.id, "peer closed the connection");
                    self.close();
                    return;
                }
                Err(AppError::ProtocolError(reason)) => {
                    warn!(session_id = self.id, peer = %self.peer_addr, "protocol violation: {reason}");
                    self.close();
                    return;
                }
                Err(err) => {
                    error!(session_id = self.id, peer = %self.peer_addr, "read failed: {err}");
                    self.close();
                    return;
                }
            };

            // the read path only hands frames over, logic runs on the dispatcher
            for frame in frames {
                trace!(
                    session_id = self.id,
                    message_id = frame.message_id,
                    body_len = frame.body.len(),
                    "frame received"
                );
                if let Err(err) = dispatcher.dispatch(DispatchItem::new(self.handle(), frame)).await {
                    error!(session_id = self.id, "failed to hand frame to dispatcher: {err}");
                    self.close();
                    return;
                }
            }
        }
    }

    async fn write_loop<W>(self: Arc<Self>, mut writer: W)
    where
        W: AsyncWrite + Unpin,
    {
        'session: loop {
            tokio::select! {
                _ = self.write_ready.notified() => {}
                _ = self.cancel.cancelled() => break,
            }
            // one write per frame, the next is issued only after the previous completed
            while let Some(frame) = self.front_frame() {
                let written = tokio::select! {
                    res = write_frame(&mut writer, &frame) => res,
                    _ = self.cancel.cancelled() => break 'session,
                };
                if let Err(err) = written {
                    error!(session_id = self.id, peer = %self.peer_addr, "write failed: {err}");
                    self.close();
                    break 'session;
                }
                if !self.complete_write() {
                    break;
                }
            }
        }
        let _ = writer.shutdown().await;
    }
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame)
        .await
        .map_err(|e| AppError::TransportError(format!("write frame error: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::TransportError(format!("flush frame error: {}", e)))?;
    Ok(())
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(session_id = self.id, "session dropped");
    }
}

/// Non-owning handle given to the dispatcher and to handlers.
///
/// Holding one never keeps a session alive, replies to a session that is
/// closed or gone are dropped.
#[derive(Debug, Clone)]
pub struct SessionRef {
    id: SessionId,
    session: Weak<Session>,
}

impl SessionRef {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    pub fn is_closed(&self) -> bool {
        self.session.upgrade().map_or(true, |s| s.is_closed())
    }

    pub fn send(&self, message_id: u16, body: impl Into<Bytes>) -> AppResult<()> {
        match self.session.upgrade() {
            Some(session) => session.send(message_id, body),
            None => {
                trace!(session_id = self.id, message_id, "session gone, message dropped");
                Ok(())
            }
        }
    }
}
