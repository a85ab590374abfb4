//! Frame scheduling
//!
//! A tick is one "before the next display refresh" callback. Ticks are
//! requested one at a time: the controller asks for the next frame only
//! while a capture session is live, so a stopped session never sees
//! another tick.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Interval, MissedTickBehavior};

/// Display refresh rate assumed when none is configured.
pub const DEFAULT_REFRESH_HZ: u32 = 60;

/// Source of scheduling ticks.
#[async_trait]
pub trait FrameScheduler: Send {
    /// Resolves at the next display refresh. Must be cancel-safe: the
    /// request is dropped whenever something else wakes the controller.
    async fn next_frame(&mut self);

    /// Forget ticks that became due before a new session started.
    fn reset(&mut self) {}
}

/// Ticks at a fixed display refresh rate.
#[derive(Debug)]
pub struct DisplayClock {
    interval: Interval,
}

impl DisplayClock {
    /// Must be called from within a tokio runtime.
    pub fn new(refresh_hz: u32) -> Self {
        let hz = refresh_hz.max(1) as u64;
        Self::with_period(Duration::from_micros(1_000_000 / hz))
    }

    pub fn with_period(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        // A slow decode drops frames rather than bursting to catch up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl FrameScheduler for DisplayClock {
    async fn next_frame(&mut self) {
        self.interval.tick().await;
    }

    fn reset(&mut self) {
        self.interval.reset();
    }
}

/// Ticks driven by the host, e.g. from its own render loop.
///
/// Ticks coalesce: at most one is ever pending, so a host that keeps
/// ticking while nothing is scanning never builds up a backlog.
#[derive(Debug)]
pub struct ManualClock {
    rx: mpsc::Receiver<()>,
}

/// Host side of a [`ManualClock`].
#[derive(Debug, Clone)]
pub struct FrameTrigger {
    tx: mpsc::Sender<()>,
}

impl ManualClock {
    pub fn new() -> (FrameTrigger, ManualClock) {
        let (tx, rx) = mpsc::channel(1);
        (FrameTrigger { tx }, ManualClock { rx })
    }
}

impl FrameTrigger {
    /// Signal one display refresh. Returns false once the scanner is gone.
    ///
    /// A tick that arrives while another is still pending merges into it.
    pub fn tick(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }

    /// Signal `n` display refreshes back to back. Unconsumed ones coalesce.
    pub fn ticks(&self, n: usize) -> bool {
        (0..n).all(|_| self.tick())
    }
}

#[async_trait]
impl FrameScheduler for ManualClock {
    async fn next_frame(&mut self) {
        if self.rx.recv().await.is_none() {
            // Trigger dropped: no more refreshes will ever arrive.
            std::future::pending::<()>().await;
        }
    }

    fn reset(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}
