//! Pending-callback table: correlation id to one-shot response callback.

use serde_json::Value;
use std::collections::HashMap;

/// Invoked once with the reply payload (`null` if the peer sent none).
pub type ResponseCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Calls awaiting a reply.
///
/// Each entry is consumed exactly once. A reply for an unknown or already
/// consumed id finds nothing.
#[derive(Default)]
pub struct PendingCallbacks {
    callbacks: HashMap<String, ResponseCallback>,
}

impl PendingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback for `callback_id`.
    pub fn insert(&mut self, callback_id: String, callback: ResponseCallback) {
        self.callbacks.insert(callback_id, callback);
    }

    /// Remove and return the callback for `response_id`.
    pub fn take(&mut self, response_id: &str) -> Option<ResponseCallback> {
        self.callbacks.remove(response_id)
    }

    /// Drop an entry without invoking it. Returns true if it existed.
    pub fn forget(&mut self, callback_id: &str) -> bool {
        self.callbacks.remove(callback_id).is_some()
    }

    pub fn contains(&self, callback_id: &str) -> bool {
        self.callbacks.contains_key(callback_id)
    }

    /// Ids still awaiting a reply, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for PendingCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallbacks")
            .field("ids", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}
