//! Events delivered to the scanner's owner

use tokio::sync::mpsc;

use crate::error::ScanError;
use crate::frame::Snapshot;

/// A decoded payload, optionally with the frame it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub content: String,
    /// Present when `capture_image` is enabled
    pub image: Option<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A new (non-duplicate) payload was decoded
    Scan(ScanResult),
    /// Scanning became active
    Active,
    /// Scanning stopped being active (also sent once at construction)
    Inactive,
    /// Something went wrong; the state machine is still consistent
    Error(ScanError),
}

/// Receiving end of a scanner's events.
pub type EventReceiver = mpsc::UnboundedReceiver<ScanEvent>;

/// Sending side used by the controller. Delivery never blocks, so an
/// emission can never stall the tick that produced it.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, event: ScanEvent) {
        // Nobody listening is not an error for the scanner.
        let _ = self.tx.send(event);
    }
}
