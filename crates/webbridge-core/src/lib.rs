//! Asynchronous message bridge between a host runtime and a guest runtime
//! embedded inside it.
//!
//! The two sides cannot call each other. Each queues messages for the other
//! and raises a signal; the other side later fetches the whole queue as one
//! batch. Calls that expect a reply carry a correlation id, and the reply
//! carries it back.
//!
//! # Architecture
//!
//! - `Bridge` / `BridgeHandle`: one coordinator task per side owning all state
//! - `Dispatcher`: routes a decoded message to a callback or a handler
//! - `Link`: in-process pump connecting two bridges
//! - `HostEmbedding`: navigation interception and script evaluation on the host
//!
//! # Example
//!
//! ```no_run
//! use webbridge_core::{handler, Bridge, Link, Side};
//! use webbridge_config::BridgeConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let host = Bridge::spawn(Side::Host, BridgeConfig::default());
//! let guest = Bridge::spawn(Side::Guest, BridgeConfig::default());
//! let _link = Link::connect(&host, &guest)?;
//!
//! guest.register_handler("echo", handler(|data, reply| {
//!     reply.reply(data)?;
//!     Ok(())
//! }))?;
//! guest.initialize(handler(|_, _| Ok(()))).await?;
//! host.initialize(handler(|_, _| Ok(()))).await?;
//!
//! let answer = host.request(Some("echo"), serde_json::json!({ "n": 1 })).await?;
//! assert_eq!(answer["n"], 1);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod context;
pub mod correlation;
pub mod diagnostics;
pub mod dispatcher;
pub mod host;
pub mod link;
pub mod message;
pub mod pending;
pub mod queue;
pub mod registry;
pub mod types;

// Re-exports for convenient access
pub use bridge::{Bridge, BridgeHandle, BridgeStats};
pub use context::GuestContext;
pub use correlation::CallbackIdGenerator;
pub use host::{GuestRuntime, HostEmbedding, InstallOutcome, NavigationDelegate};
pub use link::{BatchSource, GatedSignal, Link, NotifySignal, Signal};
pub use message::{decode_batch, encode_batch, Message};
pub use pending::ResponseCallback;
pub use registry::{handler, Handler, ReplySink};
pub use types::{BridgeError, Diagnostic, Side};

// Re-export url::Url for implementors of NavigationDelegate
pub use url::Url;
