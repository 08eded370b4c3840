//! Routes one decoded message to a pending callback or a handler.

use crate::bridge::Command;
use crate::diagnostics::Reporter;
use crate::message::Message;
use crate::pending::PendingCallbacks;
use crate::registry::{HandlerRegistry, ReplySink};
use crate::types::Diagnostic;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;
use tracing::trace;

/// Owns the handler registry and the pending-callback table of one side.
pub struct Dispatcher {
    registry: HandlerRegistry,
    pending: PendingCallbacks,
    commands: mpsc::UnboundedSender<Command>,
    reporter: Reporter,
}

impl Dispatcher {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, reporter: Reporter) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            pending: PendingCallbacks::new(),
            commands,
            reporter,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    pub fn pending(&self) -> &PendingCallbacks {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingCallbacks {
        &mut self.pending
    }

    /// Dispatch one message. Never panics and never returns an error:
    /// every failure is reported and the message dropped.
    pub fn dispatch(&mut self, message: Message) {
        match message {
            Message::Reply {
                response_id,
                response_data,
            } => match self.pending.take(&response_id) {
                Some(callback) => {
                    trace!(response_id = %response_id, "Resolving pending callback");
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(response_data))) {
                        self.reporter.report(Diagnostic::HandlerFailed {
                            handler_name: None,
                            reason: format!(
                                "response callback for {} panicked: {}",
                                response_id,
                                panic_message(&panic)
                            ),
                        });
                    }
                }
                None => self
                    .reporter
                    .report(Diagnostic::UnmatchedReply { response_id }),
            },
            Message::Call {
                handler_name,
                data,
                callback_id,
            } => {
                let sink = match callback_id {
                    Some(id) => ReplySink::to_caller(id, self.commands.clone()),
                    None => ReplySink::noop(),
                };

                let Some(handler) = self.registry.resolve(handler_name.as_deref()) else {
                    self.reporter.report(Diagnostic::NoHandler { handler_name });
                    return;
                };

                trace!(handler = ?handler_name, "Invoking handler");
                let reason = match catch_unwind(AssertUnwindSafe(|| handler(data, sink))) {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => format!("{:#}", e),
                    Err(panic) => format!("panicked: {}", panic_message(&panic)),
                };
                self.reporter.report(Diagnostic::HandlerFailed {
                    handler_name,
                    reason,
                });
            }
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::handler;
    use crate::types::Side;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn setup() -> (
        Dispatcher,
        mpsc::UnboundedReceiver<Command>,
        tokio::sync::broadcast::Receiver<Diagnostic>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Reporter::new(Side::Guest, 16);
        let diagnostics = reporter.subscribe();
        (Dispatcher::new(tx, reporter), rx, diagnostics)
    }

    #[test]
    fn test_reply_resolves_and_removes() {
        let (mut dispatcher, _rx, _diag) = setup();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        dispatcher
            .pending_mut()
            .insert("cb_1_JS_0".to_string(), Box::new(move |v| *slot.lock().unwrap() = Some(v)));

        dispatcher.dispatch(Message::reply("cb_1_JS_0", json!({ "ok": true })));

        assert_eq!(*seen.lock().unwrap(), Some(json!({ "ok": true })));
        assert!(dispatcher.pending().is_empty());
    }

    #[test]
    fn test_unmatched_reply_is_reported() {
        let (mut dispatcher, _rx, mut diag) = setup();
        dispatcher.pending_mut().insert("cb_2".to_string(), Box::new(|_| {}));

        dispatcher.dispatch(Message::reply("cb_404", Value::Null));

        assert_eq!(
            diag.try_recv().unwrap(),
            Diagnostic::UnmatchedReply {
                response_id: "cb_404".to_string()
            }
        );
        assert!(dispatcher.pending().contains("cb_2"));
    }

    #[test]
    fn test_call_with_callback_id_enqueues_reply() {
        let (mut dispatcher, mut rx, _diag) = setup();
        dispatcher.registry_mut().register(
            "echo",
            handler(|data, reply| {
                reply.reply(data)?;
                Ok(())
            }),
        );

        dispatcher.dispatch(Message::call(
            Some("echo".to_string()),
            json!([1, 2]),
            Some("cb_5_Native_0".to_string()),
        ));

        match rx.try_recv().unwrap() {
            Command::Enqueue { message, callback } => {
                assert!(callback.is_none());
                assert_eq!(message, Message::reply("cb_5_Native_0", json!([1, 2])));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_send_gets_noop_sink() {
        let (mut dispatcher, mut rx, _diag) = setup();
        let awaited = Arc::new(Mutex::new(None));
        let slot = awaited.clone();
        dispatcher.registry_mut().set_default(handler(move |_, reply| {
            *slot.lock().unwrap() = Some(reply.is_awaited());
            reply.reply("nobody listens")?;
            Ok(())
        }));

        dispatcher.dispatch(Message::call(None, json!("hi"), None));

        assert_eq!(*awaited.lock().unwrap(), Some(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_missing_handler_is_reported_not_fatal() {
        let (mut dispatcher, mut rx, mut diag) = setup();
        dispatcher.dispatch(Message::call(
            Some("nobody".to_string()),
            Value::Null,
            Some("cb_1".to_string()),
        ));
        assert_eq!(
            diag.try_recv().unwrap(),
            Diagnostic::NoHandler {
                handler_name: Some("nobody".to_string())
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failing_handlers_are_contained() {
        let (mut dispatcher, mut rx, mut diag) = setup();
        dispatcher
            .registry_mut()
            .register("err", handler(|_, _| anyhow::bail!("bad input")));
        dispatcher
            .registry_mut()
            .register("panic", handler(|_, _| panic!("kaboom")));

        dispatcher.dispatch(Message::call(Some("err".into()), Value::Null, Some("cb_1".into())));
        dispatcher.dispatch(Message::call(Some("panic".into()), Value::Null, Some("cb_2".into())));

        match diag.try_recv().unwrap() {
            Diagnostic::HandlerFailed { handler_name, reason } => {
                assert_eq!(handler_name.as_deref(), Some("err"));
                assert!(reason.contains("bad input"));
            }
            other => panic!("unexpected diagnostic: {:?}", other),
        }
        match diag.try_recv().unwrap() {
            Diagnostic::HandlerFailed { reason, .. } => assert!(reason.contains("kaboom")),
            other => panic!("unexpected diagnostic: {:?}", other),
        }
        // No reply is sent for a failed handler.
        assert!(rx.try_recv().is_err());
    }
}
