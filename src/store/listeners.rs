//! Change listeners

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Registry of change callbacks
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl Listeners {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Call every listener registered at the time of the call
    ///
    /// The registry lock is released first, so listeners may subscribe or
    /// unsubscribe from inside the callback.
    pub fn emit(&self) {
        let current: Vec<Listener> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in current {
            listener();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.entries.lock().retain(|(entry, _)| *entry != id);
    }
}

/// Handle returned by `subscribe`
///
/// Dropping it leaves the listener registered; call [`Subscription::unsubscribe`]
/// to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
