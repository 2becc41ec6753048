//! Online/offline state.

use tokio::sync::watch;
use tracing::info;

/// Tracks connectivity and publishes transitions.
///
/// The platform probe lives outside the engine and reports through
/// [`ConnectivityMonitor::set_online`]. Receivers from
/// [`ConnectivityMonitor::subscribe`] wake only on actual transitions.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records the current connectivity; returns true on a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    /// Returns a receiver of transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
