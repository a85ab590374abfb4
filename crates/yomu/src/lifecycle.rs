//! Scanner lifecycle state machine
//!
//! Pure bookkeeping: which transitions are legal, and which one (if any)
//! is in flight. Side effects (camera, capture session, events) belong to
//! the controller in [`crate::scanner`].
//!
//! ```text
//! Stopped                    --start-->      Started
//! Started | Active | Inactive --stop-->      Stopped
//! Started | Inactive         --activate-->   Active
//! Started | Active           --deactivate--> Inactive
//! ```
//!
//! Activation is asynchronous (the camera has to be acquired first), so
//! firing `Activate` yields [`Transition::Pending`]. The controller later
//! resolves it with [`Lifecycle::commit`] or [`Lifecycle::abort`]; until
//! then the machine stays in the source state and refuses other events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Stopped,
    /// Started but not (yet) scanning
    Started,
    /// Camera running, frames being decoded
    Active,
    /// Started, suspended (e.g. host hidden)
    Inactive,
}

impl ScanState {
    /// Destination of `event` from this state, if the event is permitted.
    pub fn target(self, event: LifecycleEvent) -> Option<ScanState> {
        use LifecycleEvent::*;
        use ScanState::*;

        match (self, event) {
            (Stopped, Start) => Some(Started),
            (Started | Active | Inactive, Stop) => Some(Stopped),
            (Started | Inactive, Activate) => Some(Active),
            (Started | Active, Deactivate) => Some(Inactive),
            _ => None,
        }
    }

    pub fn is_stopped(self) -> bool {
        self == ScanState::Stopped
    }

    pub fn is_active(self) -> bool {
        self == ScanState::Active
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Stopped => write!(f, "stopped"),
            ScanState::Started => write!(f, "started"),
            ScanState::Active => write!(f, "active"),
            ScanState::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Start,
    Stop,
    Activate,
    Deactivate,
}

/// Why a transition did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The event is not legal from the current state
    NotPermitted,
    /// Another transition is still pending
    Busy,
    /// Host is hidden and background scanning is disabled
    Hidden,
    /// No camera was ever supplied
    NoCamera,
    /// The camera could not be started
    Acquisition(MediaError),
    /// Superseded by a later stop, restart, or deactivation
    Cancelled,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotPermitted => write!(f, "not permitted"),
            Rejection::Busy => write!(f, "transition pending"),
            Rejection::Hidden => write!(f, "host hidden"),
            Rejection::NoCamera => write!(f, "no camera"),
            Rejection::Acquisition(e) => write!(f, "{}", e),
            Rejection::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of firing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Accepted; waiting on an asynchronous step before it takes effect
    Pending { from: ScanState, to: ScanState },
    /// Took effect
    Committed { from: ScanState, to: ScanState },
    /// Did not take effect; the state is still `from`
    Rejected {
        from: ScanState,
        event: LifecycleEvent,
        reason: Rejection,
    },
}

impl Transition {
    pub fn is_committed(&self) -> bool {
        matches!(self, Transition::Committed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Transition::Rejected { .. })
    }

    /// State the machine is in once this outcome is known.
    pub fn state(&self) -> ScanState {
        match self {
            Transition::Pending { from, .. } => *from,
            Transition::Committed { to, .. } => *to,
            Transition::Rejected { from, .. } => *from,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Transition::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTransition {
    from: ScanState,
    to: ScanState,
    event: LifecycleEvent,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ScanState,
    pending: Option<PendingTransition>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ScanState::Stopped,
            pending: None,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Destination of the in-flight transition, if any
    pub fn pending_target(&self) -> Option<ScanState> {
        self.pending.map(|p| p.to)
    }

    /// Whether `event` would be accepted right now.
    pub fn can(&self, event: LifecycleEvent) -> bool {
        self.pending.is_none() && self.state.target(event).is_some()
    }

    /// Fire an event. `Activate` is held pending; everything else commits.
    pub fn fire(&mut self, event: LifecycleEvent) -> Transition {
        let from = self.state;

        if self.pending.is_some() {
            return Transition::Rejected {
                from,
                event,
                reason: Rejection::Busy,
            };
        }

        let Some(to) = from.target(event) else {
            return Transition::Rejected {
                from,
                event,
                reason: Rejection::NotPermitted,
            };
        };

        if event == LifecycleEvent::Activate {
            self.pending = Some(PendingTransition { from, to, event });
            return Transition::Pending { from, to };
        }

        self.state = to;
        Transition::Committed { from, to }
    }

    /// Complete the pending transition.
    pub fn commit(&mut self) -> Option<Transition> {
        let pending = self.pending.take()?;
        self.state = pending.to;
        Some(Transition::Committed {
            from: pending.from,
            to: pending.to,
        })
    }

    /// Abandon the pending transition; the state stays where it was.
    pub fn abort(&mut self, reason: Rejection) -> Option<Transition> {
        let pending = self.pending.take()?;
        Some(Transition::Rejected {
            from: pending.from,
            event: pending.event,
            reason,
        })
    }
}
