use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, warn};

use super::{AppError, AppResult, SessionRegistry, Shutdown};
use crate::logic::DispatcherHandle;

/// The accept loop.
///
/// Every accepted connection becomes a session in the registry. A session
/// keeps a connection permit and a clone of `shutdown_complete_tx` until both
/// of its tasks have finished.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    dispatcher: DispatcherHandle,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        registry: Arc<SessionRegistry>,
        dispatcher: DispatcherHandle,
        limit_connections: Arc<Semaphore>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> Self {
        Server {
            listener,
            registry,
            dispatcher,
            limit_connections,
            notify_shutdown,
            shutdown_complete_tx,
        }
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until accepting fails for good.
    ///
    // Graceful shutdown sequence:
    // 1. The caller drops this future on ctrl-c, no more connections are accepted.
    // 2. The caller broadcasts on `notify_shutdown`, every session reader closes its session.
    // 3. Once all session tasks exit, their `shutdown_complete_tx` clones are dropped and
    //    the caller's receiver returns.
    // 4. The dispatcher is shut down last, it drains whatever the sessions enqueued.
    #[tracing::instrument(skip_all, name = "accept_loop")]
    pub async fn run(&self) -> AppResult<()> {
        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalStateError(format!("connection limiter closed: {e}")))?;

            let socket = self.accept().await?;
            debug!("accept new connection");

            let guard = (permit, self.shutdown_complete_tx.clone());
            let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
            if let Err(err) = self
                .registry
                .accept(socket, self.dispatcher.clone(), shutdown, guard)
            {
                // the peer went away between accept and session setup
                warn!("failed to set up session: {err}");
            }
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::TransportError(format!(
                            "accept tcp server error: {}",
                            err
                        )));
                    }
                    warn!("accept failed, retrying in {}s: {}", backoff, err);
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}
