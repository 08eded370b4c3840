//! Host-side embedding of the bridge.
//!
//! The host cannot call into the guest except by evaluating a script, and
//! the guest cannot call the host at all except by starting a navigation to
//! a reserved URL. `HostEmbedding` sits in front of the host's existing
//! navigation delegate: signal URLs are consumed and turned into a fetch of
//! the guest's queue, everything else is passed through unchanged.
//!
//! In the other direction a pump task waits for the host bridge's signal,
//! drains the host queue and evaluates the deliver script in the guest.

use crate::bridge::BridgeHandle;
use crate::link::{GatedSignal, NotifySignal};
use crate::types::BridgeError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Executes scripts inside the guest runtime.
pub trait GuestRuntime: Send + Sync {
    /// Evaluate `script`, returning its result as a string if it produced one.
    fn evaluate(&self, script: &str) -> Option<String>;
}

/// Reacts to navigation events in the host.
///
/// Every method has a permissive default so implementors override only
/// what they care about.
pub trait NavigationDelegate: Send + Sync {
    /// Decide whether a navigation to `url` may proceed.
    fn should_start_load(&self, _url: &Url) -> bool {
        true
    }

    fn did_start_load(&self) {}

    fn did_finish_load(&self) {}

    fn did_fail_load(&self, _error: &str) {}
}

/// Outcome of trying to install the guest half of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Loads are still in flight.
    Loading,
    /// The guest already has a bridge; nothing was injected.
    AlreadyPresent,
    /// The script was injected and the guest now reports a bridge.
    Installed,
    /// Injection ran but the guest still reports no bridge.
    Failed,
    /// The guest gave no answer to the readiness check.
    Unavailable,
}

/// Intercepts navigation for the bridge and delegates the rest.
pub struct HostEmbedding {
    bridge: BridgeHandle,
    guest: Arc<dyn GuestRuntime>,
    previous: Option<Arc<dyn NavigationDelegate>>,
    bridge_script: String,
    gate: Arc<GatedSignal>,
    loads: AtomicUsize,
    pump: JoinHandle<()>,
}

impl HostEmbedding {
    /// Embed the host-side `bridge`.
    ///
    /// `bridge_script` is the guest half, injected once all loads finish.
    /// Messages the host queues before then are pushed once it is installed.
    /// Must be called from within a tokio runtime.
    pub fn new(
        bridge: BridgeHandle,
        guest: Arc<dyn GuestRuntime>,
        bridge_script: impl Into<String>,
    ) -> Result<Self, BridgeError> {
        let wake = NotifySignal::new();
        let gate = Arc::new(GatedSignal::new(Arc::new(wake.clone())));
        bridge.set_signal(gate.clone())?;

        let pump = {
            let bridge = bridge.clone();
            let guest = guest.clone();
            tokio::spawn(async move {
                loop {
                    wake.notified().await;
                    match push_batch(&bridge, &guest).await {
                        Ok(_) => {}
                        Err(BridgeError::ChannelClosed) => {
                            debug!("Host bridge closed, stopping guest pump");
                            return;
                        }
                        Err(e) => error!(error = %e, "Failed to push messages to guest"),
                    }
                }
            })
        };

        Ok(Self {
            bridge,
            guest,
            previous: None,
            bridge_script: bridge_script.into(),
            gate,
            loads: AtomicUsize::new(0),
            pump,
        })
    }

    /// Chain to the delegate that was installed before the bridge.
    pub fn with_previous_delegate(mut self, delegate: Arc<dyn NavigationDelegate>) -> Self {
        self.previous = Some(delegate);
        self
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    /// Returns true once the guest half is installed and signals flow.
    pub fn is_guest_ready(&self) -> bool {
        self.gate.is_open()
    }

    /// Returns true if `url` is the bridge's wake-up URL.
    pub fn is_signal_url(&self, url: &Url) -> bool {
        let config = self.bridge.config();
        url.scheme() == config.signal_scheme && url.host_str() == Some(config.signal_host.as_str())
    }

    /// Fetch the guest's queue by evaluating the fetch script, and deliver it.
    pub fn fetch_from_guest(&self) -> Result<(), BridgeError> {
        let command = &self.bridge.config().fetch_command;
        match self.guest.evaluate(command) {
            Some(batch) => self.bridge.deliver(batch),
            None => {
                warn!("Guest returned nothing for the fetch command");
                Ok(())
            }
        }
    }

    /// Drain the host queue into the guest now.
    ///
    /// Returns false when nothing was pushed: the queue was empty or the
    /// guest half is not installed yet, in which case messages stay queued.
    pub async fn push_to_guest(&self) -> Result<bool, BridgeError> {
        if !self.gate.is_open() {
            return Ok(false);
        }
        push_batch(&self.bridge, &self.guest).await
    }

    /// Install the guest half of the bridge once no loads are in flight.
    pub fn ensure_guest_bridge(&self) -> InstallOutcome {
        if self.loads.load(Ordering::SeqCst) > 0 {
            return InstallOutcome::Loading;
        }

        let check = &self.bridge.config().ready_check_command;
        match self.guest.evaluate(check).as_deref() {
            Some("true") => {
                debug!("Guest bridge already present");
                // A reloaded page may keep its bridge; make sure signals flow.
                self.gate.open();
                return InstallOutcome::AlreadyPresent;
            }
            Some("false") => {}
            other => {
                warn!(answer = ?other, "Guest did not answer the readiness check");
                return InstallOutcome::Unavailable;
            }
        }

        self.guest.evaluate(&self.bridge_script);

        if self.guest.evaluate(check).as_deref() == Some("true") {
            info!("Guest bridge installed");
            self.gate.open();
            InstallOutcome::Installed
        } else {
            error!("Injection of the guest bridge failed");
            InstallOutcome::Failed
        }
    }

    fn finish_one_load(&self) -> usize {
        let previous = self
            .loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

impl Drop for HostEmbedding {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn push_batch(
    bridge: &BridgeHandle,
    guest: &Arc<dyn GuestRuntime>,
) -> Result<bool, BridgeError> {
    let batch = bridge.drain_outgoing_batch().await?;
    if batch == "[]" {
        return Ok(false);
    }
    trace!(bytes = batch.len(), "Pushing batch to guest");

    let script = bridge.config().deliver_script(&batch);
    let guest = guest.clone();
    // Script evaluation may block on the guest's own thread.
    tokio::task::spawn_blocking(move || guest.evaluate(&script))
        .await
        .map_err(|e| BridgeError::Other(format!("guest evaluation task failed: {}", e)))?;
    Ok(true)
}

impl NavigationDelegate for HostEmbedding {
    fn should_start_load(&self, url: &Url) -> bool {
        if self.is_signal_url(url) {
            if let Err(e) = self.fetch_from_guest() {
                error!(error = %e, "Failed to fetch messages from guest");
            }
            return false;
        }

        match &self.previous {
            Some(delegate) => delegate.should_start_load(url),
            None => true,
        }
    }

    fn did_start_load(&self) {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delegate) = &self.previous {
            delegate.did_start_load();
        }
    }

    fn did_finish_load(&self) {
        if self.finish_one_load() == 0 {
            self.ensure_guest_bridge();
        }
        if let Some(delegate) = &self.previous {
            delegate.did_finish_load();
        }
    }

    fn did_fail_load(&self, error: &str) {
        self.finish_one_load();
        if let Some(delegate) = &self.previous {
            delegate.did_fail_load(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::types::Side;
    use std::sync::Mutex;
    use std::time::Duration;
    use webbridge_config::BridgeConfig;

    /// Stands in for a script engine: answers the readiness check and the
    /// fetch command, and records everything it evaluates.
    #[derive(Default)]
    struct FakeGuest {
        installed: Mutex<bool>,
        accepts_script: bool,
        /// Gives no answer to anything, like a page without a script context.
        silent: bool,
        outgoing: Mutex<String>,
        evaluated: Mutex<Vec<String>>,
    }

    impl FakeGuest {
        fn accepting() -> Self {
            Self {
                accepts_script: true,
                outgoing: Mutex::new("[]".to_string()),
                ..Default::default()
            }
        }

        fn count(&self, script: &str) -> usize {
            self.evaluated
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.as_str() == script)
                .count()
        }

        fn delivered(&self) -> Vec<String> {
            self.evaluated
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.starts_with("WebBridge._handleMessages("))
                .cloned()
                .collect()
        }

        async fn wait_for_deliveries(&self, n: usize) {
            tokio::time::timeout(Duration::from_secs(2), async {
                while self.delivered().len() < n {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
        }
    }

    impl GuestRuntime for FakeGuest {
        fn evaluate(&self, script: &str) -> Option<String> {
            self.evaluated.lock().unwrap().push(script.to_string());
            if self.silent {
                return None;
            }
            let config = BridgeConfig::default();
            if script == config.ready_check_command {
                return Some(self.installed.lock().unwrap().to_string());
            }
            if script == config.fetch_command {
                return Some(std::mem::replace(&mut *self.outgoing.lock().unwrap(), "[]".to_string()));
            }
            if script == "install" && self.accepts_script {
                *self.installed.lock().unwrap() = true;
            }
            None
        }
    }

    struct Recorder {
        urls: Mutex<Vec<String>>,
        allow: bool,
    }

    impl NavigationDelegate for Recorder {
        fn should_start_load(&self, url: &Url) -> bool {
            self.urls.lock().unwrap().push(url.to_string());
            self.allow
        }
    }

    fn embed(guest: Arc<FakeGuest>) -> HostEmbedding {
        let bridge = Bridge::spawn(Side::Host, BridgeConfig::default());
        HostEmbedding::new(bridge, guest, "install").unwrap()
    }

    #[tokio::test]
    async fn test_non_signal_urls_go_to_previous_delegate() {
        let previous = Arc::new(Recorder {
            urls: Mutex::new(Vec::new()),
            allow: false,
        });
        let host = embed(Arc::new(FakeGuest::accepting())).with_previous_delegate(previous.clone());

        let url = Url::parse("https://example.com/page").unwrap();
        assert!(!host.should_start_load(&url));
        assert_eq!(*previous.urls.lock().unwrap(), vec!["https://example.com/page".to_string()]);

        let host = embed(Arc::new(FakeGuest::accepting()));
        assert!(host.should_start_load(&url));
    }

    #[tokio::test]
    async fn test_signal_url_fetches_guest_batch() {
        let guest = Arc::new(FakeGuest::accepting());
        *guest.outgoing.lock().unwrap() = r#"[{"data":"from guest"}]"#.to_string();
        let host = embed(guest.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        host.bridge()
            .initialize(crate::registry::handler(move |data, _| {
                log.lock().unwrap().push(data);
                Ok(())
            }))
            .await
            .unwrap();

        let url = Url::parse("wvbscheme://__wvb_host_message__").unwrap();
        assert!(host.is_signal_url(&url));
        assert!(!host.should_start_load(&url));

        host.bridge().stats().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!("from guest")]);
    }

    #[tokio::test]
    async fn test_injects_once_after_last_load() {
        let guest = Arc::new(FakeGuest::accepting());
        let host = embed(guest.clone());

        host.did_start_load();
        host.did_start_load();
        host.did_finish_load();
        assert!(!host.is_guest_ready());
        assert_eq!(host.ensure_guest_bridge(), InstallOutcome::Loading);

        host.did_fail_load("subframe failed");
        host.did_start_load();
        host.did_finish_load();
        assert!(host.is_guest_ready());

        // A later load finds the bridge present and does not inject again.
        host.did_start_load();
        host.did_finish_load();
        assert_eq!(guest.count("install"), 1);
    }

    #[tokio::test]
    async fn test_host_messages_reach_guest_once_installed() {
        let guest = Arc::new(FakeGuest::accepting());
        let host = embed(guest.clone());

        host.bridge().send("early").unwrap();
        assert!(!host.push_to_guest().await.unwrap());
        assert!(guest.delivered().is_empty());
        assert_eq!(host.bridge().stats().await.unwrap().queued, 1);

        assert_eq!(host.ensure_guest_bridge(), InstallOutcome::Installed);
        guest.wait_for_deliveries(1).await;

        host.bridge().send(serde_json::json!({ "n": 2 })).unwrap();
        guest.wait_for_deliveries(2).await;

        assert_eq!(
            guest.delivered(),
            vec![
                r#"WebBridge._handleMessages([{"data":"early"}]);"#.to_string(),
                r#"WebBridge._handleMessages([{"data":{"n":2}}]);"#.to_string(),
            ]
        );
        assert!(!host.push_to_guest().await.unwrap());
    }

    #[tokio::test]
    async fn test_silent_guest_is_unavailable() {
        let guest = Arc::new(FakeGuest {
            silent: true,
            ..FakeGuest::accepting()
        });
        let host = embed(guest.clone());
        host.bridge().send("waiting").unwrap();

        assert_eq!(host.ensure_guest_bridge(), InstallOutcome::Unavailable);
        assert!(!host.is_guest_ready());
        assert_eq!(guest.count("install"), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(guest.delivered().is_empty());
        assert_eq!(host.bridge().stats().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn test_failed_injection_keeps_gate_closed() {
        let guest = Arc::new(FakeGuest {
            accepts_script: false,
            ..Default::default()
        });
        let host = embed(guest);
        assert_eq!(host.ensure_guest_bridge(), InstallOutcome::Failed);
        assert!(!host.is_guest_ready());
    }
}
