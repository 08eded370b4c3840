//! Wake-up signals and the pump that moves batches between two sides.
//!
//! Signals are level-triggered: any number of signals raised before the
//! peer fetches collapse into one fetch, and that fetch takes everything
//! queued so far.

use crate::bridge::BridgeHandle;
use crate::types::BridgeError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Tells the peer that outgoing messages are ready to be fetched.
///
/// Fire-and-forget; implementations must tolerate being called many times.
pub trait Signal: Send + Sync {
    fn notify(&self);
}

/// Something the peer's outgoing batch can be fetched from.
#[async_trait]
pub trait BatchSource: Send + Sync {
    async fn fetch_batch(&self) -> Result<String, BridgeError>;
}

#[async_trait]
impl BatchSource for BridgeHandle {
    async fn fetch_batch(&self) -> Result<String, BridgeError> {
        self.drain_outgoing_batch().await
    }
}

impl BridgeHandle {
    /// The peer has signaled: fetch its batch from `source` and deliver it here.
    pub async fn on_incoming_signal(&self, source: &dyn BatchSource) -> Result<(), BridgeError> {
        let batch = source.fetch_batch().await?;
        trace!(side = %self.side(), bytes = batch.len(), "Fetched peer batch");
        self.deliver(batch)
    }
}

/// A [`Signal`] backed by a tokio [`Notify`]; pending permits coalesce.
#[derive(Debug, Clone, Default)]
pub struct NotifySignal {
    notify: Arc<Notify>,
}

impl NotifySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until at least one signal has been raised since the last wait.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Signal for NotifySignal {
    fn notify(&self) {
        self.notify.notify_one();
    }
}

/// Holds signals back until the receiving side is ready.
///
/// Signals raised while closed are remembered as one; opening the gate
/// forwards it.
pub struct GatedSignal {
    inner: Arc<dyn Signal>,
    open: AtomicBool,
    missed: AtomicBool,
}

impl GatedSignal {
    pub fn new(inner: Arc<dyn Signal>) -> Self {
        Self {
            inner,
            open: AtomicBool::new(false),
            missed: AtomicBool::new(false),
        }
    }

    /// Open the gate, forwarding a signal if one was held back.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        if self.missed.swap(false, Ordering::SeqCst) {
            self.inner.notify();
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Signal for GatedSignal {
    fn notify(&self) {
        if self.is_open() {
            self.inner.notify();
            return;
        }
        self.missed.store(true, Ordering::SeqCst);
        // The gate may have opened between the check and the store.
        if self.is_open() && self.missed.swap(false, Ordering::SeqCst) {
            self.inner.notify();
        }
    }
}

/// An in-process connection between two bridges.
///
/// Each direction has a pump task: it waits for the sender's signal, drains
/// the sender's queue and delivers the batch to the receiver.
pub struct Link {
    pumps: Vec<JoinHandle<()>>,
}

impl Link {
    /// Connect `a` and `b` in both directions.
    pub fn connect(a: &BridgeHandle, b: &BridgeHandle) -> Result<Self, BridgeError> {
        let pumps = vec![Self::pump(a, b)?, Self::pump(b, a)?];
        debug!(a = %a.side(), b = %b.side(), "Bridges linked");
        Ok(Self { pumps })
    }

    fn pump(from: &BridgeHandle, to: &BridgeHandle) -> Result<JoinHandle<()>, BridgeError> {
        let signal = NotifySignal::new();
        from.set_signal(Arc::new(signal.clone()))?;

        let from = from.clone();
        let to = to.clone();
        Ok(tokio::spawn(async move {
            loop {
                signal.notified().await;
                match to.on_incoming_signal(&from).await {
                    Ok(()) => {}
                    Err(BridgeError::ChannelClosed) => {
                        debug!(from = %from.side(), to = %to.side(), "Link closed");
                        return;
                    }
                    Err(e) => warn!(error = %e, "Failed to move batch across link"),
                }
            }
        }))
    }

    /// Stop both pumps and wait until they have exited.
    ///
    /// Messages still queued stay queued. Dropping a `Link` stops the pumps
    /// without waiting.
    pub async fn disconnect(mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
            if let Err(e) = pump.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Link pump ended abnormally");
                }
            }
        }
        debug!("Bridges unlinked");
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSignal {
        count: AtomicUsize,
    }

    impl Signal for CountingSignal {
        fn notify(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_gated_signal_holds_until_open() {
        let counter = Arc::new(CountingSignal::default());
        let gate = GatedSignal::new(counter.clone());

        gate.notify();
        gate.notify();
        assert_eq!(counter.count.load(Ordering::SeqCst), 0);

        gate.open();
        assert_eq!(counter.count.load(Ordering::SeqCst), 1);

        gate.notify();
        assert_eq!(counter.count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_open_without_missed_signal_is_silent() {
        let counter = Arc::new(CountingSignal::default());
        let gate = GatedSignal::new(counter.clone());
        gate.open();
        assert!(gate.is_open());
        assert_eq!(counter.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_leaves_messages_queued() {
        use crate::bridge::Bridge;
        use crate::types::Side;
        use webbridge_config::BridgeConfig;

        let host = Bridge::spawn(Side::Host, BridgeConfig::default());
        let guest = Bridge::spawn(Side::Guest, BridgeConfig::default());
        let link = Link::connect(&host, &guest).unwrap();

        link.disconnect().await;
        host.send("stranded").unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(host.stats().await.unwrap().queued, 1);
        assert_eq!(guest.stats().await.unwrap().buffered, 0);
    }

    #[tokio::test]
    async fn test_notify_signal_coalesces() {
        let signal = NotifySignal::new();
        signal.notify();
        signal.notify();
        signal.notify();
        signal.notified().await;

        // Only one permit was stored.
        let second = tokio::time::timeout(std::time::Duration::from_millis(20), signal.notified()).await;
        assert!(second.is_err());
    }
}
