//! Error definitions, side identity and diagnostics.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use webbridge_config::BridgeConfig;

/// Errors that can occur during bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// `initialize` was called on a side that is already initialized.
    #[error("Bridge already initialized")]
    AlreadyInitialized,

    /// A payload could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound batch was not a JSON array of messages.
    #[error("Malformed batch: {0}")]
    Decode(String),

    /// An awaited request got no reply before its deadline.
    #[error("Call timed out after {0}ms")]
    CallTimeout(u64),

    /// The bridge coordinator is gone.
    #[error("Bridge channel closed")]
    ChannelClosed,

    /// No named handler and no default handler for a call.
    #[error("No handler for message: {0}")]
    NoHandler(String),

    /// Generic error wrapper.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        BridgeError::Other(err.to_string())
    }
}

/// Which of the two runtimes a bridge instance lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The embedding runtime.
    Host,
    /// The scripting runtime embedded inside the host.
    Guest,
}

impl Side {
    /// The tag this side embeds in the correlation ids it mints.
    pub fn tag<'a>(&self, config: &'a BridgeConfig) -> &'a str {
        match self {
            Side::Host => &config.host_tag,
            Side::Guest => &config.guest_tag,
        }
    }

    /// The other side.
    pub fn peer(&self) -> Side {
        match self {
            Side::Host => Side::Guest,
            Side::Guest => Side::Host,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Host => write!(f, "host"),
            Side::Guest => write!(f, "guest"),
        }
    }
}

/// A reported, non-propagating failure.
///
/// Each of these is terminal for the message it concerns; nothing is retried.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// An inbound batch could not be decoded and was discarded whole.
    DecodeFailed { reason: String },
    /// A reply arrived for a correlation id with no pending callback.
    UnmatchedReply { response_id: String },
    /// A call named no resolvable handler and no default handler exists.
    NoHandler { handler_name: Option<String> },
    /// A handler returned an error or panicked.
    HandlerFailed {
        handler_name: Option<String>,
        reason: String,
    },
    /// An outgoing payload could not be serialized and was not enqueued.
    EncodeFailed { reason: String },
    /// An awaited request was abandoned at its deadline.
    CallTimedOut { callback_id: String },
    /// The wake-up signal panicked; the queued messages stay queued.
    SignalFailed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_tags() {
        let config = BridgeConfig::default();
        assert_eq!(Side::Guest.tag(&config), "JS");
        assert_eq!(Side::Host.tag(&config), "Native");
        assert_eq!(Side::Host.peer(), Side::Guest);
        assert_eq!(Side::Guest.to_string(), "guest");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(BridgeError::CallTimeout(250).to_string(), "Call timed out after 250ms");
        let err: BridgeError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, BridgeError::Other(ref m) if m == "boom"));
    }
}
