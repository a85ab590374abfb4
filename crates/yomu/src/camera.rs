//! Camera collaborator and the lease that guarantees it is released

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::MediaError;
use crate::surface::FrameSource;

/// A camera device the scanner can acquire.
///
/// Implementations wrap whatever platform capture API is available.
/// `stop` must be idempotent: the scanner calls it exactly once per
/// `start`, but also when cancelling an acquisition that may not have
/// opened the device yet.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Stable identifier of the physical device
    fn id(&self) -> &str;

    /// Human-readable label, if the platform exposes one
    fn name(&self) -> Option<&str> {
        None
    }

    /// Open the device and return its frame stream.
    async fn start(&self) -> Result<Box<dyn FrameSource>, MediaError>;

    /// Release the device.
    fn stop(&self);
}

/// Shared, type-erased camera handle.
pub type CameraRef = Arc<dyn Camera>;

/// Whether two handles refer to the same physical device.
pub fn same_device(a: &CameraRef, b: &CameraRef) -> bool {
    Arc::ptr_eq(a, b) || a.id() == b.id()
}

/// Display adapter for logging a camera by name or id.
pub(crate) struct CameraLabel<'a>(pub &'a dyn Camera);

impl fmt::Display for CameraLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.name() {
            Some(name) => write!(f, "{} ({})", name, self.0.id()),
            None => write!(f, "{}", self.0.id()),
        }
    }
}

/// Ownership of a started camera for the duration of a capture session.
///
/// Calls [`Camera::stop`] exactly once, on [`release`](Self::release) or
/// on drop, whichever comes first.
pub struct CameraLease {
    camera: Option<CameraRef>,
}

impl CameraLease {
    pub(crate) fn new(camera: CameraRef) -> Self {
        Self {
            camera: Some(camera),
        }
    }

    pub fn is_held(&self) -> bool {
        self.camera.is_some()
    }

    /// Stop the camera. Later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            debug!(camera = %CameraLabel(camera.as_ref()), "Releasing camera");
            camera.stop();
        }
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.release();
    }
}
