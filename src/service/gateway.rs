use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::{runtime, signal};
use tracing::{error, info, trace};

use super::{AppError, AppResult, Server, ServerConfig, SessionRegistry};
use crate::logic::{DispatchStats, Dispatcher, DispatcherHandle, HandlerTable};

/// Process level bootstrap: one dispatcher, one registry, one listening socket.
pub struct Gateway {
    config: Arc<ServerConfig>,
    handlers: Arc<HandlerTable>,
}

impl Gateway {
    pub fn new(config: Arc<ServerConfig>, handlers: HandlerTable) -> Self {
        Gateway {
            config,
            handlers: Arc::new(handlers),
        }
    }

    /// Runs until ctrl-c, then shuts everything down in order.
    pub fn start(&self, rt: &runtime::Runtime) -> AppResult<DispatchStats> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        let dispatcher = Dispatcher::start(self.handlers.clone(), &self.config.dispatcher)?;
        let registry = SessionRegistry::new(self.config.session.clone());

        rt.block_on(Self::run_tcp_server(
            self.config.clone(),
            registry.clone(),
            dispatcher.handle(),
            notify_shutdown.clone(),
            shutdown_complete_tx,
        ))?;

        // tcp server has been shutdown, tell every session to close
        if notify_shutdown.send(()).is_err() {
            trace!("no live session to notify");
        }
        trace!("waiting for sessions to finish...");
        rt.block_on(shutdown_complete_rx.recv());

        let stats = dispatcher.shutdown()?;
        info!(
            processed = stats.processed,
            unknown = stats.unknown,
            failed = stats.failed,
            remaining_sessions = registry.len(),
            "gateway shutdown complete"
        );
        Ok(stats)
    }

    async fn run_tcp_server(
        config: Arc<ServerConfig>,
        registry: Arc<SessionRegistry>,
        dispatcher: DispatcherHandle,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> AppResult<()> {
        let listen_address = config.listen_address();

        let listener = TcpListener::bind(&listen_address).await.map_err(|err| {
            let error_msg = format!(
                "Failed to bind server to address: {} - Error: {}",
                listen_address, err
            );
            error!(error_msg);
            AppError::IllegalStateError(error_msg)
        })?;
        info!("tcp server binding to {} for listening", &listen_address);

        let server = Server::new(
            listener,
            registry,
            dispatcher,
            Arc::new(Semaphore::new(config.network.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
        );
        tokio::select! {
          res = server.run() => {
              if let Err(err) = res {
                  error!(cause = %err, "failed to accept");
              }
          }
          _ = signal::ctrl_c() => {
              info!("get shutdown signal");
          }
        }

        Ok(())
    }
}
