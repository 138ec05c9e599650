pub mod callbacks;
pub mod cursor;
pub mod manager;
pub mod metrics;
pub mod reclaim;
pub mod scene;

use std::sync::OnceLock;
use std::thread::{self, ThreadId};

/// Remembers the first thread that presented a frame.
#[derive(Debug, Default)]
pub struct RenderThread {
    id: OnceLock<ThreadId>,
}

impl RenderThread {
    /// Records the calling thread on first use. Returns `true` when this call
    /// recorded it.
    pub fn observe(&self) -> bool {
        let current = thread::current().id();
        let mut recorded = false;
        self.id.get_or_init(|| {
            recorded = true;
            current
        });
        recorded
    }

    pub fn is_observed(&self) -> bool {
        self.id.get().is_some()
    }

    pub fn is_current(&self) -> bool {
        self.id.get() == Some(&thread::current().id())
    }
}
