//! Camera that serves a single still image

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use tracing::info;

use crate::camera::Camera;
use crate::error::MediaError;
use crate::frame::{Geometry, PixelBuffer, BYTES_PER_PIXEL};
use crate::surface::FrameSource;

/// Replays an image file as an endless stream of identical frames.
///
/// The file is read on every `start`, so a missing or corrupt file shows
/// up as an acquisition error just like an unplugged device would.
pub struct StillCamera {
    id: String,
    path: PathBuf,
}

impl StillCamera {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            id: path.display().to_string(),
            path,
        }
    }
}

#[async_trait]
impl Camera for StillCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<Box<dyn FrameSource>, MediaError> {
        let path = self.path.clone();
        let image = tokio::task::spawn_blocking(move || image::open(&path))
            .await
            .map_err(|e| MediaError::Other(e.to_string()))?
            .map_err(|e| match e {
                image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    MediaError::NotFound(self.id.clone())
                }
                other => MediaError::Other(other.to_string()),
            })?
            .to_rgba8();

        info!(
            path = %self.path.display(),
            width = image.width(),
            height = image.height(),
            "Still image loaded"
        );
        Ok(Box::new(StillFrame {
            image: Arc::new(image),
        }))
    }

    fn stop(&self) {}
}

struct StillFrame {
    image: Arc<RgbaImage>,
}

impl FrameSource for StillFrame {
    fn geometry(&self) -> Geometry {
        Geometry::new(self.image.width(), self.image.height())
    }

    fn render(&mut self, buf: &mut PixelBuffer) -> bool {
        let geometry = buf.geometry();
        if geometry == self.geometry() {
            buf.as_bytes_mut().copy_from_slice(self.image.as_raw());
            return true;
        }

        // Nearest-neighbour scale into the session's buffer.
        let (sw, sh) = (self.image.width(), self.image.height());
        let out = buf.as_bytes_mut();
        for y in 0..geometry.height {
            let sy = y * sh / geometry.height;
            for x in 0..geometry.width {
                let sx = x * sw / geometry.width;
                let offset = (y as usize * geometry.width as usize + x as usize) * BYTES_PER_PIXEL;
                out[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&self.image.get_pixel(sx, sy).0);
            }
        }
        true
    }
}
