//! The bridge coordinator for one side.
//!
//! A `Bridge` task exclusively owns the outgoing queue, the startup buffer,
//! the handler registry and the pending-callback table. Everything else talks
//! to it through a cloneable [`BridgeHandle`], which hands each operation to
//! the task over a channel. No state is shared, so nothing is locked.
//!
//! Inbound messages are never dispatched inline with the command that
//! delivered them: they become deferred turns, run one at a time once that
//! command has completed.

use crate::correlation::CallbackIdGenerator;
use crate::diagnostics::Reporter;
use crate::dispatcher::{panic_message, Dispatcher};
use crate::link::Signal;
use crate::message::{decode_batch, Message};
use crate::pending::ResponseCallback;
use crate::queue::{OutgoingQueue, StartupBuffer};
use crate::registry::Handler;
use crate::types::{BridgeError, Diagnostic, Side};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace};
use webbridge_config::BridgeConfig;

/// Operations marshalled onto the coordinator task.
pub(crate) enum Command {
    Enqueue {
        message: Message,
        callback: Option<(String, ResponseCallback)>,
    },
    Register {
        name: String,
        handler: Handler,
    },
    Initialize {
        default_handler: Handler,
        done: oneshot::Sender<Result<(), BridgeError>>,
    },
    Deliver {
        batch: String,
    },
    Drain {
        reply: oneshot::Sender<String>,
    },
    Forget {
        callback_id: String,
    },
    SetSignal {
        signal: Arc<dyn Signal>,
    },
    Report(Diagnostic),
    Stats {
        reply: oneshot::Sender<BridgeStats>,
    },
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Enqueue { message, callback } => f
                .debug_struct("Enqueue")
                .field("message", message)
                .field("callback_id", &callback.as_ref().map(|(id, _)| id))
                .finish(),
            Command::Register { name, .. } => {
                f.debug_struct("Register").field("name", name).finish()
            }
            Command::Initialize { .. } => f.write_str("Initialize"),
            Command::Deliver { batch } => f.debug_struct("Deliver").field("batch", batch).finish(),
            Command::Drain { .. } => f.write_str("Drain"),
            Command::Forget { callback_id } => f
                .debug_struct("Forget")
                .field("callback_id", callback_id)
                .finish(),
            Command::SetSignal { .. } => f.write_str("SetSignal"),
            Command::Report(diagnostic) => f.debug_tuple("Report").field(diagnostic).finish(),
            Command::Stats { .. } => f.write_str("Stats"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Snapshot of a bridge's internal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    pub side: Side,
    pub initialized: bool,
    /// Messages waiting for the peer's next fetch.
    pub queued: usize,
    /// Inbound messages held until initialization.
    pub buffered: usize,
    /// Correlation ids awaiting a reply.
    pub pending: Vec<String>,
    pub handlers: Vec<String>,
    pub has_default_handler: bool,
}

/// Spawns bridge coordinators.
pub struct Bridge;

impl Bridge {
    /// Spawn the coordinator for `side` on the current tokio runtime.
    pub fn spawn(side: Side, config: BridgeConfig) -> BridgeHandle {
        let config = Arc::new(config);
        let (commands, rx) = mpsc::unbounded_channel();
        let reporter = Reporter::new(side, config.diagnostics_capacity);

        let state = BridgeState {
            side,
            config: config.clone(),
            queue: OutgoingQueue::new(),
            startup: StartupBuffer::default(),
            dispatcher: Dispatcher::new(commands.clone(), reporter.clone()),
            signal: None,
            reporter: reporter.clone(),
            turns: VecDeque::new(),
        };

        info!(side = %side, "Starting bridge");
        tokio::spawn(state.run(rx));

        BridgeHandle {
            side,
            ids: Arc::new(CallbackIdGenerator::new(side.tag(&config))),
            config,
            commands,
            reporter,
        }
    }
}

struct BridgeState {
    side: Side,
    config: Arc<BridgeConfig>,
    queue: OutgoingQueue,
    startup: StartupBuffer,
    dispatcher: Dispatcher,
    signal: Option<Arc<dyn Signal>>,
    reporter: Reporter,
    turns: VecDeque<Message>,
}

impl BridgeState {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            if !self.handle(command) {
                break;
            }
            while let Some(message) = self.turns.pop_front() {
                self.dispatcher.dispatch(message);
                tokio::task::yield_now().await;
            }
        }
        debug!(side = %self.side, "Bridge stopped");
    }

    /// Apply one command. Returns false when the bridge should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Enqueue { message, callback } => {
                if let Some((callback_id, callback)) = callback {
                    self.dispatcher.pending_mut().insert(callback_id, callback);
                }
                if self.config.log_traffic {
                    debug!(side = %self.side, msg = ?message, "SENT");
                }
                self.queue.enqueue(message);
                self.fire_signal();
            }
            Command::Register { name, handler } => {
                trace!(side = %self.side, name = %name, "Registering handler");
                self.dispatcher.registry_mut().register(name, handler);
            }
            Command::Initialize {
                default_handler,
                done,
            } => {
                let _ = done.send(self.initialize(default_handler));
            }
            Command::Deliver { batch } => self.receive(&batch),
            Command::Drain { reply } => {
                // The requester gave up; keep the messages for the next fetch.
                if reply.is_closed() {
                    return true;
                }
                let batch = match self.queue.fetch_and_drain() {
                    Ok(batch) => batch,
                    Err(e) => {
                        self.reporter.report(Diagnostic::EncodeFailed {
                            reason: e.to_string(),
                        });
                        "[]".to_string()
                    }
                };
                let _ = reply.send(batch);
            }
            Command::Forget { callback_id } => {
                if self.dispatcher.pending_mut().forget(&callback_id) {
                    self.reporter.report(Diagnostic::CallTimedOut { callback_id });
                }
            }
            Command::SetSignal { signal } => {
                self.signal = Some(signal);
                // Anything queued before the signal existed still needs a wakeup.
                if !self.queue.is_empty() {
                    self.fire_signal();
                }
            }
            Command::Report(diagnostic) => self.reporter.report(diagnostic),
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown => {
                info!(side = %self.side, "Shutting down bridge");
                return false;
            }
        }
        true
    }

    fn initialize(&mut self, default_handler: Handler) -> Result<(), BridgeError> {
        let Some(replay) = self.startup.retire() else {
            error!(side = %self.side, "Bridge initialized twice");
            return Err(BridgeError::AlreadyInitialized);
        };

        self.dispatcher.registry_mut().set_default(default_handler);
        info!(
            side = %self.side,
            buffered = replay.len(),
            "Bridge initialized, replaying startup messages"
        );
        self.turns.extend(replay);
        Ok(())
    }

    fn receive(&mut self, batch: &str) {
        let messages = match decode_batch(batch) {
            Ok(messages) => messages,
            Err(e) => {
                self.reporter.report(Diagnostic::DecodeFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        trace!(side = %self.side, count = messages.len(), "Received batch");
        for message in messages {
            if self.config.log_traffic {
                debug!(side = %self.side, msg = ?message, "RCVD");
            }
            if let Some(message) = self.startup.offer(message) {
                self.turns.push_back(message);
            }
        }
    }

    fn fire_signal(&self) {
        let Some(signal) = &self.signal else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| signal.notify())) {
            self.reporter.report(Diagnostic::SignalFailed {
                reason: panic_message(&panic),
            });
        }
    }

    fn stats(&self) -> BridgeStats {
        let mut pending: Vec<String> = self
            .dispatcher
            .pending()
            .ids()
            .map(|id| id.to_string())
            .collect();
        pending.sort();
        BridgeStats {
            side: self.side,
            initialized: self.startup.is_retired(),
            queued: self.queue.len(),
            buffered: self.startup.len(),
            pending,
            handlers: self.dispatcher.registry().names(),
            has_default_handler: self.dispatcher.registry().has_default(),
        }
    }
}

/// Cloneable access to one side's bridge.
///
/// Fire-and-forget operations never block and may be used from inside
/// handlers. Operations that return a value wait for the coordinator.
#[derive(Clone)]
pub struct BridgeHandle {
    side: Side,
    config: Arc<BridgeConfig>,
    ids: Arc<CallbackIdGenerator>,
    commands: mpsc::UnboundedSender<Command>,
    reporter: Reporter,
}

impl BridgeHandle {
    /// Install the default handler and replay the startup buffer.
    ///
    /// A side can be initialized once; later attempts fail with
    /// [`BridgeError::AlreadyInitialized`] and change nothing.
    pub async fn initialize(&self, default_handler: Handler) -> Result<(), BridgeError> {
        let (done, rx) = oneshot::channel();
        self.submit(Command::Initialize {
            default_handler,
            done,
        })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    /// Register a named handler. The last registration for a name wins.
    pub fn register_handler(&self, name: impl Into<String>, handler: Handler) -> Result<(), BridgeError> {
        self.submit(Command::Register {
            name: name.into(),
            handler,
        })
    }

    /// Send `data` to the peer's default handler without expecting a reply.
    pub fn send<T: Serialize>(&self, data: T) -> Result<(), BridgeError> {
        self.call(None, data, None).map(|_| ())
    }

    /// Send `data` to the peer's default handler; `callback` receives the reply.
    pub fn send_with_callback<T, F>(&self, data: T, callback: F) -> Result<String, BridgeError>
    where
        T: Serialize,
        F: FnOnce(Value) + Send + 'static,
    {
        self.call(None, data, Some(Box::new(callback)))
            .map(|id| id.unwrap_or_default())
    }

    /// Call a handler on the peer.
    ///
    /// `handler_name` of `None` targets the default handler. With a callback,
    /// a fresh correlation id is minted, registered and returned; the callback
    /// then fires at most once, after the peer's handler replies. There is no
    /// deadline here; see [`BridgeHandle::request`] for one.
    pub fn call<T: Serialize>(
        &self,
        handler_name: Option<&str>,
        data: T,
        callback: Option<ResponseCallback>,
    ) -> Result<Option<String>, BridgeError> {
        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                self.reporter.report(Diagnostic::EncodeFailed {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let callback = callback.map(|cb| (self.ids.next_id(), cb));
        let callback_id = callback.as_ref().map(|(id, _)| id.clone());

        let message = Message::call(handler_name.map(str::to_string), data, callback_id.clone());
        self.submit(Command::Enqueue { message, callback })?;
        Ok(callback_id)
    }

    /// Call a handler on the peer and wait for its reply.
    ///
    /// Bounded by `call_timeout_ms`; on expiry the pending entry is dropped,
    /// so a late reply is reported as unmatched.
    pub async fn request<T: Serialize>(
        &self,
        handler_name: Option<&str>,
        data: T,
    ) -> Result<Value, BridgeError> {
        let (tx, rx) = oneshot::channel();
        let callback: ResponseCallback = Box::new(move |value| {
            let _ = tx.send(value);
        });
        let callback_id = self
            .call(handler_name, data, Some(callback))?
            .unwrap_or_default();

        let timeout_ms = self.config.call_timeout_ms;
        if timeout_ms == 0 {
            return rx.await.map_err(|_| BridgeError::ChannelClosed);
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(result) => result.map_err(|_| BridgeError::ChannelClosed),
            Err(_) => {
                let _ = self.submit(Command::Forget { callback_id });
                Err(BridgeError::CallTimeout(timeout_ms))
            }
        }
    }

    /// Hand an inbound batch to this side. Decoding happens on the coordinator.
    pub fn deliver(&self, batch: impl Into<String>) -> Result<(), BridgeError> {
        self.submit(Command::Deliver {
            batch: batch.into(),
        })
    }

    /// Return the outgoing queue as one serialized batch and clear it.
    pub async fn drain_outgoing_batch(&self) -> Result<String, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Drain { reply })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Blocking variant of [`BridgeHandle::drain_outgoing_batch`] for
    /// synchronous callers on a thread outside the async runtime.
    pub fn drain_outgoing_batch_blocking(&self) -> Result<String, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Drain { reply })?;
        rx.blocking_recv().map_err(|_| BridgeError::ChannelClosed)
    }

    /// Set the signal raised whenever a message is queued for the peer.
    ///
    /// The signal runs on the coordinator task and must not block on this
    /// bridge; wake a task that fetches instead.
    pub fn set_signal(&self, signal: Arc<dyn Signal>) -> Result<(), BridgeError> {
        self.submit(Command::SetSignal { signal })
    }

    /// Snapshot of the coordinator's state.
    pub async fn stats(&self) -> Result<BridgeStats, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Stats { reply })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Subscribe to diagnostics reported by this side.
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.reporter.subscribe()
    }

    /// Stop the coordinator. Pending callbacks are dropped without firing.
    pub fn shutdown(&self) -> Result<(), BridgeError> {
        self.submit(Command::Shutdown)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn submit(&self, command: Command) -> Result<(), BridgeError> {
        self.commands
            .send(command)
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("side", &self.side)
            .field("tag", &self.ids.tag())
            .finish()
    }
}
