//! Capture loop: frame scheduling, per-tick scanning, and deduplication
//!
//! - Frame scheduling (display clock or host-driven ticks)
//! - Capture sessions (one per activation)
//! - Refractory window for suppressing repeated results
//! - Synthetic and still-image cameras for development

pub mod clock;
pub mod refractory;
pub mod session;

#[cfg(feature = "still")]
pub mod still;
#[cfg(feature = "test-source")]
pub mod test_source;

pub use clock::{DisplayClock, FrameScheduler, FrameTrigger, ManualClock, DEFAULT_REFRESH_HZ};
pub use refractory::Refractory;
pub use session::{Attempt, CaptureSession, SessionStats};

#[cfg(feature = "still")]
pub use still::StillCamera;
#[cfg(feature = "test-source")]
pub use test_source::{TestCamera, TestPatternDecoder, TestSourceConfig};
