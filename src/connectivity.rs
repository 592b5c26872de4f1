//! Connectivity monitor.
//!
//! Observes network reachability and exposes it two ways: a level
//! (`is_online`) that mutation routing consults, and a `watch` channel
//! that the notebook's background listener awaits to trigger
//! reconciliation when the device comes back online.
//!
//! The monitor itself does not probe the network; the embedding platform
//! feeds it transitions via `set_online` / `set_offline`.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared online/offline signal. Cheap to clone.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Current reachability.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record that the network became reachable.
    pub fn set_online(&self) {
        self.tx.send_replace(true);
    }

    /// Record that the network became unreachable.
    pub fn set_offline(&self) {
        self.tx.send_replace(false);
    }

    /// Subscribe to reachability transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
