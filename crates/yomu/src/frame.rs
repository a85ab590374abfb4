//! Pixel buffer types shared by frame sources, decoders, and snapshots

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Width and height of a capture buffer, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    /// Create a geometry from raw dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A geometry is usable once both dimensions are known.
    ///
    /// Frame sources report `0x0` until their first frame has arrived.
    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Number of pixels covered
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size in bytes of an RGBA8 buffer with this geometry
    pub fn byte_len(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Caller-owned RGBA8 buffer that frame sources render into.
///
/// Allocated once per capture session, when the first usable frame
/// establishes the geometry, and reused for every later attempt.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    geometry: Geometry,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            data: vec![0; geometry.byte_len()],
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    /// Raw RGBA8 bytes, row-major, no padding
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for frame sources rendering into the buffer
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// RGBA value at `(x, y)`, or `None` outside the buffer
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        let offset = (y as usize * self.geometry.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = &self.data[offset..offset + BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Rec. 601 luma of the pixel at `(x, y)`; 0 outside the buffer
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        match self.pixel(x, y) {
            Some([r, g, b, _]) => {
                ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
            }
            None => 0,
        }
    }

    /// Copy the current contents into an immutable snapshot
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            geometry: self.geometry,
            pixels: Bytes::copy_from_slice(&self.data),
        }
    }
}

/// Frozen copy of the frame a result was decoded from.
///
/// Raw RGBA8; encoding to an image format is left to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub geometry: Geometry,
    pub pixels: Bytes,
}
