//! Video surface the camera stream is attached to
//!
//! The surface plays the role of a video element: the active camera's
//! stream is attached to it while scanning, the capture loop renders the
//! current frame out of it, and the host may render it as a preview.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, ScanError};
use crate::frame::{Geometry, PixelBuffer};

/// A live stream of video frames produced by a started camera.
pub trait FrameSource: Send {
    /// Dimensions of the current frame; `0x0` until a frame has arrived.
    fn geometry(&self) -> Geometry;

    /// Render the current frame into `buf`, scaling to the buffer's geometry.
    ///
    /// Returns `false` if no frame is available right now.
    fn render(&mut self, buf: &mut PixelBuffer) -> bool;
}

/// Shared surface a scanner renders frames from.
pub struct VideoSurface {
    stream: Mutex<Option<Box<dyn FrameSource>>>,
    mirror: AtomicBool,
    claimed: AtomicBool,
}

impl std::fmt::Debug for VideoSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSurface")
            .field("attached", &self.is_attached())
            .field("mirror", &self.is_mirrored())
            .field("claimed", &self.claimed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for VideoSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSurface {
    pub fn new() -> Self {
        Self {
            stream: Mutex::new(None),
            mirror: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
        }
    }

    /// Whether the host should mirror this surface when displaying it.
    ///
    /// Only affects presentation; captured pixels are never mirrored.
    pub fn is_mirrored(&self) -> bool {
        self.mirror.load(Ordering::Relaxed)
    }

    pub fn set_mirror(&self, mirror: bool) {
        self.mirror.store(mirror, Ordering::Relaxed);
    }

    /// Attach a stream, replacing (and dropping) any previous one.
    pub fn attach(&self, stream: Box<dyn FrameSource>) {
        *self.lock() = Some(stream);
    }

    /// Detach the current stream, if any.
    pub fn detach(&self) -> Option<Box<dyn FrameSource>> {
        self.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Dimensions of the attached stream's current frame (`0x0` if none).
    pub fn geometry(&self) -> Geometry {
        self.lock()
            .as_ref()
            .map(|s| s.geometry())
            .unwrap_or(Geometry::new(0, 0))
    }

    /// Render the attached stream's current frame into `buf`.
    pub fn render(&self, buf: &mut PixelBuffer) -> bool {
        match self.lock().as_mut() {
            Some(stream) => stream.render(buf),
            None => false,
        }
    }

    /// Bind this surface to a scanner for the claim's lifetime.
    pub(crate) fn claim(self: &Arc<Self>) -> Result<SurfaceClaim> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ScanError::SurfaceInUse)?;
        Ok(SurfaceClaim {
            surface: Arc::clone(self),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn FrameSource>>> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive binding of a surface to one scanner; released on drop.
pub(crate) struct SurfaceClaim {
    surface: Arc<VideoSurface>,
}

impl SurfaceClaim {
    pub(crate) fn surface(&self) -> &Arc<VideoSurface> {
        &self.surface
    }
}

impl Drop for SurfaceClaim {
    fn drop(&mut self) {
        self.surface.detach();
        self.surface.claimed.store(false, Ordering::Release);
    }
}
