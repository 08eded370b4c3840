//! Correlation ids linking a call to its reply.
//!
//! Format: `cb_<counter>_<side tag>_<unix millis>`. The counter starts at 1
//! and is never reused for the lifetime of a side; the tag keeps the two
//! sides' counters from colliding. Receivers treat ids as opaque.

use std::sync::atomic::{AtomicU64, Ordering};

/// Mints unique callback ids for one side.
#[derive(Debug)]
pub struct CallbackIdGenerator {
    next: AtomicU64,
    tag: String,
}

impl CallbackIdGenerator {
    /// Create a generator for the side identified by `tag`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            next: AtomicU64::new(1),
            tag: tag.into(),
        }
    }

    /// Mint the next id.
    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!(
            "cb_{}_{}_{}",
            n,
            self.tag,
            chrono::Utc::now().timestamp_millis()
        )
    }

    /// The side tag embedded in every id.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}
