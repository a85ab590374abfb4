//! Yomu - live video barcode scanning
//!
//! A [`Scanner`] binds a camera to a [`VideoSurface`], samples frames on a
//! schedule, runs a [`Decoder`] over them, and reports new payloads as
//! [`ScanEvent`]s. Feature flags control the optional pieces:
//!
//! - **Core** (always available): lifecycle state machine, capture loop,
//!   refractory deduplication, camera/decoder/surface seams
//! - **`qr`** (default): QR decoding via `rqrr`
//! - **`still`**: camera that replays an image file
//! - **`test-source`**: synthetic camera and matching decoder, no hardware

pub mod camera;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod frame;
pub mod lifecycle;
pub mod scanner;
pub mod surface;
pub mod visibility;

pub use camera::{same_device, Camera, CameraLease, CameraRef};
pub use capture::{DisplayClock, FrameScheduler, FrameTrigger, ManualClock};
pub use config::ScannerConfig;
pub use decoder::{DecodeError, Decoder};
pub use error::{MediaError, Result, ScanError};
pub use event::{EventReceiver, ScanEvent, ScanResult};
pub use frame::{Geometry, PixelBuffer, Snapshot};
pub use lifecycle::{Lifecycle, LifecycleEvent, Rejection, ScanState, Transition};
pub use scanner::{Scanner, ScannerBuilder, ScannerStats};
pub use surface::{FrameSource, VideoSurface};
pub use visibility::{Visibility, VisibilityController, VisibilityFeed};

#[cfg(feature = "qr")]
pub use decoder::QrDecoder;

#[cfg(feature = "still")]
pub use capture::StillCamera;

#[cfg(feature = "test-source")]
pub use capture::{TestCamera, TestPatternDecoder, TestSourceConfig};
