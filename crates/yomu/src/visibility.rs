//! Host visibility feed
//!
//! Scanning is suspended while the host (page, window, app) is hidden
//! unless background scanning is enabled. The host reports changes through
//! a [`VisibilityController`]; the scanner watches the paired feed.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        self == Visibility::Visible
    }
}

/// Receiving side, handed to the scanner.
pub type VisibilityFeed = watch::Receiver<Visibility>;

/// Host-side sender for visibility changes.
#[derive(Debug, Clone)]
pub struct VisibilityController {
    tx: watch::Sender<Visibility>,
}

impl VisibilityController {
    /// Create a controller and the feed to pass to a scanner.
    pub fn new(initial: Visibility) -> (Self, VisibilityFeed) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    /// Report the current visibility. Repeating the current value is a no-op.
    pub fn set(&self, visibility: Visibility) {
        self.tx.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
    }

    pub fn show(&self) {
        self.set(Visibility::Visible);
    }

    pub fn hide(&self) {
        self.set(Visibility::Hidden);
    }

    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    /// Another feed for an additional scanner.
    pub fn subscribe(&self) -> VisibilityFeed {
        self.tx.subscribe()
    }
}
