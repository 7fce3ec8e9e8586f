// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::handler::HandlerTable;
use crate::network::{IncomingFrame, SessionRef};
use crate::service::DispatcherConfig;
use crate::{AppError, AppResult};

/// One decoded frame on its way to application logic, consumed exactly once.
#[derive(Debug)]
pub struct DispatchItem {
    pub session: SessionRef,
    pub frame: IncomingFrame,
}

impl DispatchItem {
    pub fn new(session: SessionRef, frame: IncomingFrame) -> Self {
        DispatchItem { session, frame }
    }
}

/// Cloneable enqueue side of the dispatcher, handed to every session.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    sender: async_channel::Sender<DispatchItem>,
}

impl DispatcherHandle {
    pub(crate) fn from_sender(sender: async_channel::Sender<DispatchItem>) -> Self {
        DispatcherHandle { sender }
    }

    /// Waits for room when the queue is full, which slows the caller's reads down.
    pub async fn dispatch(&self, item: DispatchItem) -> AppResult<()> {
        self.sender.send(item).await.map_err(|e| {
            AppError::ChannelSendError(format!(
                "dispatcher stopped, message {} from session {} dropped",
                e.0.frame.message_id,
                e.0.session.id()
            ))
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub processed: u64,
    pub unknown: u64,
    pub failed: u64,
}

/// Single consumer of the shared dispatch queue.
///
/// All handlers run on one dedicated thread in the order their frames were
/// enqueued, which gives one global processing order across sessions.
#[derive(Debug)]
pub struct Dispatcher {
    sender: async_channel::Sender<DispatchItem>,
    worker: Option<JoinHandle<DispatchStats>>,
}

impl Dispatcher {
    pub fn start(handlers: Arc<HandlerTable>, config: &DispatcherConfig) -> AppResult<Dispatcher> {
        let (sender, receiver) = async_channel::bounded(config.channel_capacity);
        let worker = thread::Builder::new()
            .name("logic-dispatcher".to_string())
            .spawn(move || run(receiver, handlers))?;
        info!(capacity = config.channel_capacity, "dispatcher started");
        Ok(Dispatcher {
            sender,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle::from_sender(self.sender.clone())
    }

    /// Stops taking new items, processes everything already queued, then joins the worker.
    pub fn shutdown(mut self) -> AppResult<DispatchStats> {
        self.stop()
    }

    fn stop(&mut self) -> AppResult<DispatchStats> {
        self.sender.close();
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|payload| {
                AppError::IllegalStateError(format!(
                    "dispatcher thread panicked: {}",
                    panic_message(payload.as_ref())
                ))
            }),
            None => Ok(DispatchStats::default()),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.stop() {
                error!("dispatcher stopped with error: {err}");
            }
        }
        debug!("dispatcher dropped");
    }
}

fn run(receiver: async_channel::Receiver<DispatchItem>, handlers: Arc<HandlerTable>) -> DispatchStats {
    debug!("dispatcher worker started");
    let mut stats = DispatchStats::default();
    // a closed channel still yields what is queued, the loop ends once it is drained
    while let Ok(item) = receiver.recv_blocking() {
        process(&handlers, item, &mut stats);
    }
    info!(
        processed = stats.processed,
        unknown = stats.unknown,
        failed = stats.failed,
        "dispatcher worker drained and exited"
    );
    stats
}

fn process(handlers: &HandlerTable, item: DispatchItem, stats: &mut DispatchStats) {
    let DispatchItem { session, frame } = item;
    let session_id = session.id();
    let message_id = frame.message_id;

    let Some(handler) = handlers.get(message_id) else {
        stats.unknown += 1;
        warn!(session_id, "{}, message dropped", AppError::UnknownMessageId(message_id));
        return;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        handler.handle(&session, message_id, &frame.body)
    }));
    match outcome {
        Ok(Ok(())) => {
            stats.processed += 1;
            debug!(
                monotonic_counter.dispatched_messages = 1_u64,
                session_id, message_id, "message handled"
            );
        }
        Ok(Err(err)) => {
            stats.failed += 1;
            error!(session_id, message_id, "handler failed: {err}");
        }
        Err(payload) => {
            stats.failed += 1;
            error!(
                session_id,
                message_id,
                "handler panicked with message: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
