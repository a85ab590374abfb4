//! Synthetic camera for development without hardware
//!
//! `TestCamera` produces a grey test pattern whose first row carries a
//! text payload, and `TestPatternDecoder` reads it back. Start latency,
//! warm-up (frames with unknown dimensions) and acquisition failures can
//! be simulated.
//!
//! Header layout, red channel of row 0:
//! ```text
//! ┌───────┬────────┬──────────────────────┐
//! │ magic │ length │ payload bytes ...    │
//! │ 0xC0  │ (1 B)  │ (length pixels)      │
//! └───────┴────────┴──────────────────────┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::camera::Camera;
use crate::decoder::{DecodeError, Decoder};
use crate::error::MediaError;
use crate::frame::{Geometry, PixelBuffer, BYTES_PER_PIXEL};
use crate::surface::FrameSource;

const MAGIC: u8 = 0xC0;
/// Longest payload the header can carry
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Configuration for the synthetic camera
#[derive(Debug, Clone)]
pub struct TestSourceConfig {
    /// Frame dimensions
    pub geometry: Geometry,
    /// Simulated time to open the device
    pub start_latency: Duration,
    /// Time after opening before frames have known dimensions
    pub warmup: Duration,
    /// Fail every `start` with this error
    pub fail_with: Option<MediaError>,
}

impl Default for TestSourceConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::new(320, 240),
            start_latency: Duration::from_millis(10),
            warmup: Duration::ZERO,
            fail_with: None,
        }
    }
}

/// Camera producing synthetic frames.
pub struct TestCamera {
    id: String,
    config: TestSourceConfig,
    payload: Arc<Mutex<Option<String>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl TestCamera {
    pub fn new(id: impl Into<String>, config: TestSourceConfig) -> Self {
        Self {
            id: id.into(),
            config,
            payload: Arc::new(Mutex::new(None)),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Payload embedded in subsequent frames (`None` for a blank pattern).
    ///
    /// Payloads longer than [`MAX_PAYLOAD`] bytes are truncated.
    pub fn set_payload(&self, payload: Option<String>) {
        *self.payload.lock().unwrap_or_else(|e| e.into_inner()) = payload;
    }

    /// Number of `start` calls so far
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls so far
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for TestCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> Option<&str> {
        Some("Test pattern")
    }

    async fn start(&self) -> Result<Box<dyn FrameSource>, MediaError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.config.start_latency).await;

        if let Some(err) = &self.config.fail_with {
            debug!(camera = %self.id, error = %err, "Test camera refusing to start");
            return Err(err.clone());
        }

        info!(
            camera = %self.id,
            geometry = %self.config.geometry,
            "Test camera started"
        );
        Ok(Box::new(TestPattern {
            geometry: self.config.geometry,
            ready_at: Instant::now() + self.config.warmup,
            payload: Arc::clone(&self.payload),
            frame_num: 0,
        }))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestPattern {
    geometry: Geometry,
    ready_at: Instant,
    payload: Arc<Mutex<Option<String>>>,
    frame_num: u32,
}

impl FrameSource for TestPattern {
    fn geometry(&self) -> Geometry {
        if Instant::now() < self.ready_at {
            Geometry::new(0, 0)
        } else {
            self.geometry
        }
    }

    fn render(&mut self, buf: &mut PixelBuffer) -> bool {
        if !self.geometry().is_known() {
            return false;
        }

        let shade = (self.frame_num & 0x3F) as u8 + 0x60;
        for px in buf.as_bytes_mut().chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&[shade, shade, shade, 0xFF]);
        }

        let payload = self.payload.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(text) = payload.as_deref() {
            write_header(buf, text.as_bytes());
        }

        self.frame_num = self.frame_num.wrapping_add(1);
        true
    }
}

fn write_header(buf: &mut PixelBuffer, payload: &[u8]) {
    let width = buf.width() as usize;
    if width < 2 {
        return;
    }
    let len = payload.len().min(MAX_PAYLOAD).min(width - 2);
    let row = buf.as_bytes_mut();
    row[0] = MAGIC;
    row[BYTES_PER_PIXEL] = len as u8;
    for (i, byte) in payload[..len].iter().enumerate() {
        row[(i + 2) * BYTES_PER_PIXEL] = *byte;
    }
}

/// Reads the payload written by [`TestCamera`] frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestPatternDecoder;

impl Decoder for TestPatternDecoder {
    fn decode(&mut self, frame: &PixelBuffer) -> Result<Option<String>, DecodeError> {
        let red = |x: u32| frame.pixel(x, 0).map(|px| px[0]);

        if red(0) != Some(MAGIC) {
            return Ok(None);
        }
        let len = red(1).ok_or_else(|| DecodeError::Unreadable("truncated header".into()))?;

        let bytes = (0..len as u32)
            .map(|i| red(i + 2))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| DecodeError::Unreadable("truncated payload".into()))?;

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| DecodeError::Unreadable(e.to_string()))
    }
}
