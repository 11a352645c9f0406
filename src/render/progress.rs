//! Progress delivery
//!
//! The orchestrator pushes `ProgressState` snapshots to listeners registered
//! per rendering id. Listeners are called outside the registry lock, so a
//! listener may safely remove itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::ProgressState;

/// Progress callback
pub type ProgressListener = Arc<dyn Fn(&ProgressState) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProgressHub {
    inner: Arc<ProgressHubInner>,
}

#[derive(Default)]
struct ProgressHubInner {
    listeners: Mutex<HashMap<String, Vec<(u64, ProgressListener)>>>,
    next_id: AtomicU64,
}

/// Handle returned by `ProgressHub::subscribe`; `remove` detaches the listener
pub struct ProgressSubscription {
    hub: ProgressHub,
    rendering_id: String,
    id: u64,
}

impl ProgressSubscription {
    /// Detach the listener. Returns whether it was still registered.
    pub fn remove(self) -> bool {
        self.hub.unsubscribe(&self.rendering_id, self.id)
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, rendering_id: &str, listener: ProgressListener) -> ProgressSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .entry(rendering_id.to_string())
            .or_default()
            .push((id, listener));

        ProgressSubscription {
            hub: self.clone(),
            rendering_id: rendering_id.to_string(),
            id,
        }
    }

    fn unsubscribe(&self, rendering_id: &str, id: u64) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let Some(set) = listeners.get_mut(rendering_id) else {
            return false;
        };

        let before = set.len();
        set.retain(|(listener_id, _)| *listener_id != id);
        let removed = set.len() != before;
        if set.is_empty() {
            listeners.remove(rendering_id);
        }
        removed
    }

    /// Deliver `state` to every listener of `rendering_id`
    pub fn emit(&self, rendering_id: &str, state: &ProgressState) {
        let listeners: Vec<ProgressListener> = match self.inner.listeners.lock().get(rendering_id) {
            Some(set) => set.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };

        for listener in listeners {
            listener(state);
        }
    }

    /// Drop every listener of `rendering_id`
    pub fn remove_all(&self, rendering_id: &str) {
        self.inner.listeners.lock().remove(rendering_id);
    }

    pub fn listener_count(&self, rendering_id: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .get(rendering_id)
            .map_or(0, Vec::len)
    }
}
