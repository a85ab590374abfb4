//! One run of the capture loop, from activation to deactivation
//!
//! A session owns the camera lease and the last-result window. The
//! controller asks it to handle each scheduling tick; every `scan_period`
//! ticks it renders the current frame, decodes it, drops duplicates and
//! queues new results on the event channel.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::refractory::Refractory;
use crate::camera::CameraLease;
use crate::config::ScannerConfig;
use crate::decoder::{DecodeError, Decoder};
use crate::error::ScanError;
use crate::event::{EventSender, ScanEvent, ScanResult};
use crate::frame::PixelBuffer;
use crate::surface::{FrameSource, VideoSurface};

/// What a single tick (or manual scan) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Session already stopped; nothing ran
    Cancelled,
    /// Not this tick's turn under the scan period
    Waiting,
    /// The surface has no usable frame yet
    NoFrame,
    /// Decoded nothing
    Nothing,
    /// Decoded the payload that is still being suppressed
    Duplicate,
    /// Decoded a new payload
    Found(ScanResult),
    /// The decoder could not be invoked
    Failed(ScanError),
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub attempts: u64,
    pub frames_skipped: u64,
    pub duplicates: u64,
    pub results: u64,
}

pub struct CaptureSession {
    scan_period: u32,
    capture_image: bool,
    continuous: bool,
    surface: Arc<VideoSurface>,
    lease: CameraLease,
    events: EventSender,
    /// Liveness of the tick loop; checked before every tick body
    running: CancellationToken,
    frame_count: u32,
    buffer: Option<PixelBuffer>,
    refractory: Refractory,
    decoder_failing: bool,
    stats: SessionStats,
}

impl CaptureSession {
    /// Attach the camera's stream to the surface and start the session.
    pub(crate) fn start(
        config: &ScannerConfig,
        surface: Arc<VideoSurface>,
        lease: CameraLease,
        stream: Box<dyn FrameSource>,
        events: EventSender,
    ) -> Self {
        surface.attach(stream);
        Self {
            scan_period: config.scan_period.max(1),
            capture_image: config.capture_image,
            continuous: config.continuous,
            surface,
            lease,
            events,
            running: CancellationToken::new(),
            frame_count: 0,
            buffer: None,
            refractory: Refractory::new(config.refractory_period),
            decoder_failing: false,
            stats: SessionStats::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }

    /// Whether the controller should keep requesting ticks for this session.
    pub fn wants_ticks(&self) -> bool {
        self.continuous && self.is_running()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// When the last result stops being suppressed, if one is recorded.
    pub fn refractory_deadline(&self) -> Option<Instant> {
        if self.is_running() {
            self.refractory.deadline()
        } else {
            None
        }
    }

    /// Resolves when the suppression window closes.
    pub async fn refractory_expired(&self) {
        self.refractory.expired().await
    }

    /// Refractory timer fired: the last result may be reported again.
    pub fn expire_refractory(&mut self) {
        if let Some(last) = self.refractory.last() {
            debug!(content = %last, "Refractory period elapsed");
        }
        self.refractory.clear();
    }

    /// Handle one scheduling tick.
    pub fn on_tick(&mut self, decoder: &mut dyn Decoder) -> Attempt {
        if !self.is_running() {
            return Attempt::Cancelled;
        }
        self.stats.ticks += 1;

        self.frame_count += 1;
        if self.frame_count < self.scan_period {
            return Attempt::Waiting;
        }
        self.frame_count = 0;

        let attempt = self.analyze(decoder, true);
        match &attempt {
            Attempt::Found(result) => {
                self.events.emit(ScanEvent::Scan(result.clone()));
            }
            Attempt::Failed(err) => {
                self.events.emit(ScanEvent::Error(err.clone()));
            }
            _ => {}
        }
        attempt
    }

    /// Scan the current frame immediately, ignoring the cadence and the
    /// suppression window. The result is returned, not emitted.
    pub fn scan_now(&mut self, decoder: &mut dyn Decoder) -> Attempt {
        if !self.is_running() {
            return Attempt::Cancelled;
        }
        self.analyze(decoder, false)
    }

    fn analyze(&mut self, decoder: &mut dyn Decoder, skip_duplicates: bool) -> Attempt {
        if self.buffer.is_none() {
            let geometry = self.surface.geometry();
            if !geometry.is_known() {
                self.stats.frames_skipped += 1;
                return Attempt::NoFrame;
            }
            info!(%geometry, "Capture geometry established");
            self.buffer = Some(PixelBuffer::new(geometry));
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return Attempt::NoFrame;
        };

        if !self.surface.render(buffer) {
            self.stats.frames_skipped += 1;
            return Attempt::NoFrame;
        }
        self.stats.attempts += 1;

        let content = match decoder.decode(buffer) {
            Ok(Some(content)) => content,
            Ok(None) => {
                self.decoder_failing = false;
                return Attempt::Nothing;
            }
            Err(DecodeError::Unreadable(reason)) => {
                debug!(%reason, "Frame not decodable");
                self.decoder_failing = false;
                return Attempt::Nothing;
            }
            Err(DecodeError::Unavailable(reason)) => {
                if self.decoder_failing {
                    return Attempt::Nothing;
                }
                warn!(%reason, "Decoder unavailable");
                self.decoder_failing = true;
                return Attempt::Failed(ScanError::DecoderUnavailable(reason));
            }
        };
        self.decoder_failing = false;

        if skip_duplicates && self.refractory.is_duplicate(&content) {
            self.stats.duplicates += 1;
            return Attempt::Duplicate;
        }

        self.refractory.record(content.clone());
        let image = self.capture_image.then(|| buffer.snapshot());
        self.stats.results += 1;
        debug!(%content, "Decoded result");

        Attempt::Found(ScanResult { content, image })
    }

    /// Stop scanning and release the camera. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.running.cancel();
        self.refractory.clear();
        self.surface.detach();
        self.lease.release();
        debug!(
            ticks = self.stats.ticks,
            attempts = self.stats.attempts,
            results = self.stats.results,
            "Capture session stopped"
        );
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}
