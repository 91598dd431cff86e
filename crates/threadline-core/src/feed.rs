//! Change feed between the panel and the sync controller.
//!
//! The feed is a single-slot queue: any number of notifications arriving
//! before the controller picks one up collapse into one pending event. While
//! disconnected, notifications are dropped outright, so the controller's own
//! separator writes during a cycle never schedule another cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Create a connected feed and the notifier that drives it.
pub fn change_feed() -> (ChangeFeed, ChangeNotifier) {
    let (tx, rx) = mpsc::channel(1);
    let connected = Arc::new(AtomicBool::new(true));
    (
        ChangeFeed {
            rx,
            connected: connected.clone(),
        },
        ChangeNotifier { tx, connected },
    )
}

/// Sending side, held by whatever watches the panel for structural changes.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: mpsc::Sender<()>,
    connected: Arc<AtomicBool>,
}

impl ChangeNotifier {
    /// Report a structural change. Returns `false` when the feed is
    /// disconnected or closed; a change coalesced into an already pending
    /// event still counts as delivered.
    pub fn notify(&self) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

#[derive(Debug)]
pub struct ChangeFeed {
    rx: mpsc::Receiver<()>,
    connected: Arc<AtomicBool>,
}

impl ChangeFeed {
    /// Wait for the next change. `None` once every notifier is gone.
    pub async fn next(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Take a pending change without waiting.
    pub fn try_next(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }

    pub fn disconnect(&mut self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Resume observing. Anything queued before the disconnect is discarded.
    pub fn reconnect(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.connected.store(true, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
