//! Error types surfaced by the scanner

use thiserror::Error;

/// Why a camera could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera is busy: {0}")]
    DeviceBusy(String),
    #[error("camera not found: {0}")]
    NotFound(String),
    #[error("camera error: {0}")]
    Other(String),
}

/// Errors reported by the scanner, either returned from construction or
/// delivered as [`ScanEvent::Error`](crate::ScanEvent::Error).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Rejected at construction; never retried.
    #[error("invalid scanner configuration: {0}")]
    InvalidConfig(String),
    /// The supplied video surface is already bound to another scanner.
    #[error("video surface is already bound to another scanner")]
    SurfaceInUse,
    /// Activation was attempted without ever being given a camera.
    #[error("no camera configured")]
    NoCamera,
    /// Camera acquisition failed; the pending activation was aborted.
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),
    /// The decoder could not be invoked at all.
    #[error("decoder unavailable: {0}")]
    DecoderUnavailable(String),
    /// The scanner task has shut down.
    #[error("scanner is closed")]
    Closed,
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
