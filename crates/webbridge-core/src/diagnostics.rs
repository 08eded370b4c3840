//! Failure reporting: every [`Diagnostic`] is logged and broadcast.

use crate::types::{Diagnostic, Side};
use tokio::sync::broadcast;
use tracing::{error, warn};

/// Logs diagnostics for one side and publishes them to subscribers.
#[derive(Debug, Clone)]
pub struct Reporter {
    side: Side,
    tx: broadcast::Sender<Diagnostic>,
}

impl Reporter {
    pub fn new(side: Side, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { side, tx }
    }

    /// Subscribe to diagnostics reported from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::DecodeFailed { reason } => {
                error!(side = %self.side, reason = %reason, "Discarding malformed batch");
            }
            Diagnostic::UnmatchedReply { response_id } => {
                warn!(side = %self.side, response_id = %response_id, "No matching callback for reply");
            }
            Diagnostic::NoHandler { handler_name } => {
                error!(
                    side = %self.side,
                    handler = ?handler_name,
                    "No handler for message and no default handler installed"
                );
            }
            Diagnostic::HandlerFailed {
                handler_name,
                reason,
            } => {
                warn!(side = %self.side, handler = ?handler_name, reason = %reason, "Handler failed");
            }
            Diagnostic::EncodeFailed { reason } => {
                error!(side = %self.side, reason = %reason, "Outgoing message not serializable, dropped");
            }
            Diagnostic::CallTimedOut { callback_id } => {
                warn!(side = %self.side, callback_id = %callback_id, "Call abandoned at deadline");
            }
            Diagnostic::SignalFailed { reason } => {
                error!(side = %self.side, reason = %reason, "Wake-up signal panicked");
            }
        }
        // No subscribers is fine.
        let _ = self.tx.send(diagnostic);
    }
}
