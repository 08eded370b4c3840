//! Handler registry and the reply sink handed to every handler.

use crate::bridge::Command;
use crate::message::Message;
use crate::types::{BridgeError, Diagnostic};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A message handler: receives the call's data and a reply sink.
///
/// Returning an error is reported and swallowed at the dispatch boundary.
pub type Handler = Arc<dyn Fn(Value, ReplySink) -> anyhow::Result<()> + Send + Sync + 'static>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(Value, ReplySink) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Lets a handler answer the call it is processing.
///
/// Always callable. For one-way sends it discards the reply. Consuming
/// `self` makes every sink one-shot.
pub struct ReplySink {
    route: Option<(String, mpsc::UnboundedSender<Command>)>,
}

impl ReplySink {
    /// A sink that answers `callback_id` by enqueuing toward the caller.
    pub(crate) fn to_caller(callback_id: String, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            route: Some((callback_id, commands)),
        }
    }

    /// A sink that discards whatever it is given.
    pub fn noop() -> Self {
        Self { route: None }
    }

    /// Returns true if someone on the other side waits for this reply.
    pub fn is_awaited(&self) -> bool {
        self.route.is_some()
    }

    /// Answer with `data`.
    pub fn reply<T: Serialize>(self, data: T) -> Result<(), BridgeError> {
        let Some((callback_id, commands)) = self.route else {
            return Ok(());
        };

        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                warn!(callback_id = %callback_id, error = %e, "Failed to serialize reply");
                let _ = commands.send(Command::Report(Diagnostic::EncodeFailed {
                    reason: e.to_string(),
                }));
                return Err(e.into());
            }
        };

        debug!(callback_id = %callback_id, "Queueing reply");
        commands
            .send(Command::Enqueue {
                message: Message::reply(callback_id, value),
                callback: None,
            })
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Answer with JSON `null`.
    pub fn reply_empty(self) -> Result<(), BridgeError> {
        self.reply(Value::Null)
    }
}

impl std::fmt::Debug for ReplySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySink")
            .field("callback_id", &self.route.as_ref().map(|(id, _)| id))
            .finish()
    }
}

/// Named handlers plus a separate default slot.
///
/// The default handler has no name, so no registration can overwrite it.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    named: HashMap<String, Handler>,
    default: Option<Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. The last registration wins.
    pub fn register(&mut self, name: impl Into<String>, handler: Handler) {
        self.named.insert(name.into(), handler);
    }

    /// Install the default handler.
    pub fn set_default(&mut self, handler: Handler) {
        self.default = Some(handler);
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Resolve by name, falling back to the default handler.
    pub fn resolve(&self, name: Option<&str>) -> Option<Handler> {
        name.and_then(|n| self.named.get(n))
            .or(self.default.as_ref())
            .cloned()
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.named.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("named", &self.names())
            .field("has_default", &self.has_default())
            .finish()
    }
}
