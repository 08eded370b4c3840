//! One bridge per guest context.

use crate::bridge::{Bridge, BridgeHandle};
use crate::types::Side;
use std::sync::OnceLock;
use tracing::debug;
use webbridge_config::BridgeConfig;

/// A guest execution context that owns at most one bridge.
///
/// Installing is idempotent: the first call spawns the guest bridge and
/// every later call returns a handle to that same bridge.
pub struct GuestContext {
    config: BridgeConfig,
    bridge: OnceLock<BridgeHandle>,
}

impl GuestContext {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            bridge: OnceLock::new(),
        }
    }

    /// Install the guest bridge if needed and return its handle.
    ///
    /// Must be called from within a tokio runtime the first time.
    pub fn install(&self) -> BridgeHandle {
        let mut spawned = false;
        let handle = self.bridge.get_or_init(|| {
            spawned = true;
            Bridge::spawn(Side::Guest, self.config.clone())
        });
        if !spawned {
            debug!("Guest bridge already installed");
        }
        handle.clone()
    }

    /// The installed bridge, if any.
    pub fn bridge(&self) -> Option<&BridgeHandle> {
        self.bridge.get()
    }

    pub fn is_installed(&self) -> bool {
        self.bridge.get().is_some()
    }
}
