//! Scanner controller
//!
//! A single task owns the lifecycle, the camera, the decoder, the frame
//! scheduler and the active capture session. Everything that can wake it
//! (handle commands, visibility changes, camera acquisition, frame ticks,
//! refractory expiry) is multiplexed through one `select!`, so state is
//! only ever touched by one piece of code at a time.
//!
//! [`Scanner`] is the cloneable handle callers use; events arrive on the
//! receiver returned by [`ScannerBuilder::spawn`].

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::camera::{same_device, CameraLabel, CameraLease, CameraRef};
use crate::capture::{
    Attempt, CaptureSession, DisplayClock, FrameScheduler, SessionStats, DEFAULT_REFRESH_HZ,
};
use crate::config::ScannerConfig;
use crate::decoder::Decoder;
use crate::error::{MediaError, Result, ScanError};
use crate::event::{EventReceiver, EventSender, ScanEvent, ScanResult};
use crate::lifecycle::{Lifecycle, LifecycleEvent, Rejection, ScanState, Transition};
use crate::surface::{FrameSource, SurfaceClaim, VideoSurface};
use crate::visibility::{Visibility, VisibilityFeed};

const COMMAND_BUFFER: usize = 32;

/// Snapshot of a scanner's state and counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerStats {
    pub state: ScanState,
    /// An activation is waiting on the camera
    pub activating: bool,
    /// Camera that the next (or current) activation uses
    pub camera: Option<String>,
    /// Counters summed over every session so far
    pub ticks: u64,
    pub attempts: u64,
    pub frames_skipped: u64,
    pub duplicates: u64,
    pub results: u64,
}

enum Command {
    Start {
        camera: Option<CameraRef>,
        reply: oneshot::Sender<Transition>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SetCamera {
        camera: CameraRef,
        reply: oneshot::Sender<()>,
    },
    Activate {
        reply: oneshot::Sender<Transition>,
    },
    Deactivate {
        reply: oneshot::Sender<Transition>,
    },
    ScanNow {
        reply: oneshot::Sender<Result<Option<ScanResult>>>,
    },
    Stats {
        reply: oneshot::Sender<ScannerStats>,
    },
}

/// Work the controller schedules for its own next turn.
enum Deferred {
    Activate,
}

/// Handle to a running scanner.
///
/// Dropping every handle stops the scanner and releases the camera.
#[derive(Debug, Clone)]
pub struct Scanner {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ScanState>,
    surface: Arc<VideoSurface>,
}

impl Scanner {
    pub fn builder(config: ScannerConfig) -> ScannerBuilder {
        ScannerBuilder::new(config)
    }

    /// Start scanning with `camera`, or the last camera if `None`.
    ///
    /// Stops first if the scanner is not stopped. Resolves once the
    /// automatic activation has either committed or been rejected.
    pub async fn start(&self, camera: Option<CameraRef>) -> Result<Transition> {
        self.request(|reply| Command::Start { camera, reply }).await
    }

    /// Stop scanning and release the camera. No-op when already stopped.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Use `camera` from now on. Restarts if scanning with another camera.
    pub async fn set_camera(&self, camera: CameraRef) -> Result<()> {
        self.request(|reply| Command::SetCamera { camera, reply }).await
    }

    /// Resume scanning. Ignored (rejected) unless started or inactive.
    pub async fn activate(&self) -> Result<Transition> {
        self.request(|reply| Command::Activate { reply }).await
    }

    /// Suspend scanning. Ignored (rejected) unless started or active.
    pub async fn deactivate(&self) -> Result<Transition> {
        self.request(|reply| Command::Deactivate { reply }).await
    }

    /// Decode the current frame right away, bypassing duplicate
    /// suppression. `None` when not active or nothing was found.
    pub async fn scan_now(&self) -> Result<Option<ScanResult>> {
        self.request(|reply| Command::ScanNow { reply }).await?
    }

    pub async fn stats(&self) -> Result<ScannerStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Last committed state
    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ScanState> {
        self.state.clone()
    }

    /// Surface the camera stream is attached to while active
    pub fn surface(&self) -> &Arc<VideoSurface> {
        &self.surface
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| ScanError::Closed)?;
        rx.await.map_err(|_| ScanError::Closed)
    }
}

/// Configures and spawns a [`Scanner`].
pub struct ScannerBuilder {
    config: ScannerConfig,
    camera: Option<CameraRef>,
    decoder: Option<Box<dyn Decoder>>,
    surface: Option<Arc<VideoSurface>>,
    visibility: Option<VisibilityFeed>,
    scheduler: Option<Box<dyn FrameScheduler>>,
}

impl ScannerBuilder {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            camera: None,
            decoder: None,
            surface: None,
            visibility: None,
            scheduler: None,
        }
    }

    /// Camera used by the first `start` without an explicit camera
    pub fn camera(mut self, camera: CameraRef) -> Self {
        self.camera = Some(camera);
        self
    }

    /// Decoder to run on each frame (defaults to QR when the `qr`
    /// feature is enabled)
    pub fn decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoder = Some(Box::new(decoder));
        self
    }

    /// Pre-existing surface to attach streams to, e.g. one the host
    /// already renders as a preview
    pub fn surface(mut self, surface: Arc<VideoSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Host visibility feed (defaults to always visible)
    pub fn visibility(mut self, feed: VisibilityFeed) -> Self {
        self.visibility = Some(feed);
        self
    }

    /// Tick source (defaults to a 60 Hz display clock)
    pub fn scheduler(mut self, scheduler: impl FrameScheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    /// Validate the configuration and spawn the controller task.
    ///
    /// Must be called from within a tokio runtime. The returned receiver
    /// already holds the initial [`ScanEvent::Inactive`].
    pub fn spawn(self) -> Result<(Scanner, EventReceiver)> {
        self.config.validate()?;

        let surface = self
            .surface
            .unwrap_or_else(|| Arc::new(VideoSurface::new()));
        let claim = surface.claim()?;
        surface.set_mirror(self.config.mirror);

        let decoder = match self.decoder {
            Some(decoder) => decoder,
            None => default_decoder()?,
        };
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Box::new(DisplayClock::new(DEFAULT_REFRESH_HZ)));
        let visibility = self.visibility.unwrap_or_else(|| {
            let (_, rx) = watch::channel(Visibility::Visible);
            rx
        });

        let (events, event_rx) = EventSender::channel();
        events.emit(ScanEvent::Inactive);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ScanState::Stopped);
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();

        info!(
            scan_period = self.config.scan_period,
            refractory_ms = self.config.refractory_period.as_millis() as u64,
            capture_image = self.config.capture_image,
            background_scan = self.config.background_scan,
            "Scanner created"
        );

        let controller = Controller {
            config: self.config,
            lifecycle: Lifecycle::new(),
            camera: self.camera,
            decoder,
            scheduler,
            claim,
            visibility,
            visibility_open: true,
            events,
            state_tx,
            commands: command_rx,
            deferred_tx,
            deferred_rx,
            pending: None,
            session: None,
            totals: SessionStats::default(),
        };
        tokio::spawn(controller.run());

        Ok((
            Scanner {
                commands: command_tx,
                state: state_rx,
                surface,
            },
            event_rx,
        ))
    }
}

#[cfg(feature = "qr")]
fn default_decoder() -> Result<Box<dyn Decoder>> {
    Ok(Box::new(crate::decoder::QrDecoder::new()))
}

#[cfg(not(feature = "qr"))]
fn default_decoder() -> Result<Box<dyn Decoder>> {
    Err(ScanError::InvalidConfig("no decoder configured".into()))
}

type Waiters = Vec<oneshot::Sender<Transition>>;

type Acquisition = BoxFuture<'static, std::result::Result<Box<dyn FrameSource>, MediaError>>;

/// Activation waiting on the camera.
struct PendingActivation {
    camera: CameraRef,
    acquire: Acquisition,
    waiters: Waiters,
}

struct Controller {
    config: ScannerConfig,
    lifecycle: Lifecycle,
    camera: Option<CameraRef>,
    decoder: Box<dyn Decoder>,
    scheduler: Box<dyn FrameScheduler>,
    claim: SurfaceClaim,
    visibility: VisibilityFeed,
    visibility_open: bool,
    events: EventSender,
    state_tx: watch::Sender<ScanState>,
    commands: mpsc::Receiver<Command>,
    deferred_tx: mpsc::UnboundedSender<Deferred>,
    deferred_rx: mpsc::UnboundedReceiver<Deferred>,
    pending: Option<PendingActivation>,
    /// Present exactly while the state is Active
    session: Option<CaptureSession>,
    totals: SessionStats,
}

impl Controller {
    async fn run(mut self) {
        loop {
            let ticking = self.session.as_ref().is_some_and(CaptureSession::wants_ticks);
            let refractory = self
                .session
                .as_ref()
                .and_then(CaptureSession::refractory_deadline)
                .is_some();
            let acquiring = self.pending.is_some();

            tokio::select! {
                biased;

                _ = self.scheduler.next_frame(), if ticking => self.on_tick(),
                _ = refractory_expired(&self.session), if refractory => self.on_refractory_expired(),
                result = acquisition(&mut self.pending), if acquiring => self.finish_activation(result),
                Some(op) = self.deferred_rx.recv() => self.run_deferred(op),
                changed = self.visibility.changed(), if self.visibility_open => match changed {
                    Ok(()) => self.on_visibility_changed(),
                    Err(_) => {
                        debug!("Visibility feed closed");
                        self.visibility_open = false;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        debug!("All scanner handles dropped, shutting down");
        self.stop();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start { camera, reply } => self.start(camera, vec![reply]),
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::SetCamera { camera, reply } => {
                self.set_camera(camera);
                let _ = reply.send(());
            }
            Command::Activate { reply } => self.activate(vec![reply]),
            Command::Deactivate { reply } => {
                let transition = self.deactivate();
                let _ = reply.send(transition);
            }
            Command::ScanNow { reply } => {
                let _ = reply.send(self.scan_now());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn start(&mut self, camera: Option<CameraRef>, waiters: Waiters) {
        if !self.lifecycle.state().is_stopped() || self.lifecycle.is_pending() {
            debug!(state = %self.lifecycle.state(), "Restarting scanner");
            self.stop();
        }
        if let Some(camera) = camera {
            self.camera = Some(camera);
        }

        self.lifecycle.fire(LifecycleEvent::Start);
        self.publish_state();
        info!("Scanner started");

        self.activate(waiters);
    }

    fn stop(&mut self) {
        if self.lifecycle.state().is_stopped() && !self.lifecycle.is_pending() {
            return;
        }

        if let Some((transition, waiters)) = self.cancel_pending() {
            notify(waiters, &transition);
        }
        self.leave_active();
        self.lifecycle.fire(LifecycleEvent::Stop);
        self.publish_state();
        info!("Scanner stopped");
    }

    fn set_camera(&mut self, camera: CameraRef) {
        let changed = !self
            .camera
            .as_ref()
            .is_some_and(|current| same_device(current, &camera));
        info!(camera = %CameraLabel(camera.as_ref()), "Camera assigned");
        self.camera = Some(camera);

        if !changed {
            return;
        }
        match self.lifecycle.state() {
            ScanState::Started | ScanState::Active => self.start(None, Vec::new()),
            ScanState::Inactive => {
                // Callers waiting on the old acquisition see it cancelled,
                // as they would on a restart from Started.
                if let Some((transition, waiters)) = self.cancel_pending() {
                    notify(waiters, &transition);
                    self.activate(Vec::new());
                }
            }
            ScanState::Stopped => {}
        }
    }

    fn activate(&mut self, waiters: Waiters) {
        if let Some(pending) = self.pending.as_mut() {
            pending.waiters.extend(waiters);
            return;
        }

        let transition = self.lifecycle.fire(LifecycleEvent::Activate);
        if !matches!(transition, Transition::Pending { .. }) {
            debug!(state = %self.lifecycle.state(), "Activate ignored");
            notify(waiters, &transition);
            return;
        }

        if !self.config.background_scan && !self.visibility.borrow().is_visible() {
            debug!("Activation vetoed: host hidden");
            self.reject_pending(Rejection::Hidden, waiters);
            return;
        }

        let Some(camera) = self.camera.clone() else {
            warn!("Activation failed: no camera configured");
            self.events.emit(ScanEvent::Error(ScanError::NoCamera));
            self.reject_pending(Rejection::NoCamera, waiters);
            return;
        };

        info!(camera = %CameraLabel(camera.as_ref()), "Acquiring camera");
        let acquire = {
            let camera = Arc::clone(&camera);
            async move { camera.start().await }.boxed()
        };
        self.pending = Some(PendingActivation {
            camera,
            acquire,
            waiters,
        });
    }

    fn finish_activation(
        &mut self,
        result: std::result::Result<Box<dyn FrameSource>, MediaError>,
    ) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let transition = match result {
            Ok(stream) => {
                let lease = CameraLease::new(pending.camera);
                let transition = self.lifecycle.commit();
                self.scheduler.reset();
                self.session = Some(CaptureSession::start(
                    &self.config,
                    Arc::clone(self.claim.surface()),
                    lease,
                    stream,
                    self.events.clone(),
                ));
                self.publish_state();
                info!("Scanning active");
                self.events.emit(ScanEvent::Active);
                transition
            }
            Err(err) => {
                warn!(
                    camera = %CameraLabel(pending.camera.as_ref()),
                    error = %err,
                    "Camera acquisition failed"
                );
                let transition = self.lifecycle.abort(Rejection::Acquisition(err.clone()));
                self.events
                    .emit(ScanEvent::Error(ScanError::MediaAcquisition(err)));
                transition
            }
        };

        if let Some(transition) = transition {
            notify(pending.waiters, &transition);
        }
    }

    /// Drop an in-flight acquisition and release whatever it may have
    /// opened. The waiters are handed back un-notified.
    fn cancel_pending(&mut self) -> Option<(Transition, Waiters)> {
        let pending = self.pending.take()?;
        drop(pending.acquire);
        pending.camera.stop();
        debug!(camera = %CameraLabel(pending.camera.as_ref()), "Pending activation cancelled");

        let transition = self.lifecycle.abort(Rejection::Cancelled)?;
        Some((transition, pending.waiters))
    }

    fn reject_pending(&mut self, reason: Rejection, waiters: Waiters) {
        if let Some(transition) = self.lifecycle.abort(reason) {
            notify(waiters, &transition);
        }
    }

    fn deactivate(&mut self) -> Transition {
        if let Some((transition, waiters)) = self.cancel_pending() {
            notify(waiters, &transition);
        }

        let state = self.lifecycle.state();
        if !self.lifecycle.can(LifecycleEvent::Deactivate) {
            debug!(%state, "Deactivate ignored");
            return self.lifecycle.fire(LifecycleEvent::Deactivate);
        }

        self.leave_active();
        let transition = self.lifecycle.fire(LifecycleEvent::Deactivate);
        self.publish_state();
        info!(from = %state, "Scanning suspended");
        transition
    }

    /// Tear down the session before the state moves on.
    fn leave_active(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
            let stats = session.stats();
            self.totals.ticks += stats.ticks;
            self.totals.attempts += stats.attempts;
            self.totals.frames_skipped += stats.frames_skipped;
            self.totals.duplicates += stats.duplicates;
            self.totals.results += stats.results;
            self.events.emit(ScanEvent::Inactive);
        }
    }

    fn on_tick(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.on_tick(&mut *self.decoder);
        }
    }

    fn on_refractory_expired(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.expire_refractory();
        }
    }

    fn on_visibility_changed(&mut self) {
        let visibility = *self.visibility.borrow_and_update();
        debug!(?visibility, "Visibility changed");

        match visibility {
            Visibility::Hidden if !self.config.background_scan => {
                self.deactivate();
            }
            Visibility::Hidden => {}
            Visibility::Visible => {
                // Activation runs on the next turn, not inside the notification.
                let _ = self.deferred_tx.send(Deferred::Activate);
            }
        }
    }

    fn run_deferred(&mut self, op: Deferred) {
        match op {
            Deferred::Activate => {
                if self.lifecycle.can(LifecycleEvent::Activate) {
                    self.activate(Vec::new());
                }
            }
        }
    }

    fn scan_now(&mut self) -> Result<Option<ScanResult>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        match session.scan_now(&mut *self.decoder) {
            Attempt::Found(result) => Ok(Some(result)),
            Attempt::Failed(err) => Err(err),
            _ => Ok(None),
        }
    }

    fn stats(&self) -> ScannerStats {
        let current = self
            .session
            .as_ref()
            .map(CaptureSession::stats)
            .unwrap_or_default();
        ScannerStats {
            state: self.lifecycle.state(),
            activating: self.pending.is_some(),
            camera: self.camera.as_ref().map(|c| c.id().to_string()),
            ticks: self.totals.ticks + current.ticks,
            attempts: self.totals.attempts + current.attempts,
            frames_skipped: self.totals.frames_skipped + current.frames_skipped,
            duplicates: self.totals.duplicates + current.duplicates,
            results: self.totals.results + current.results,
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.lifecycle.state());
    }
}

fn notify(waiters: Waiters, transition: &Transition) {
    for waiter in waiters {
        let _ = waiter.send(transition.clone());
    }
}

async fn refractory_expired(session: &Option<CaptureSession>) {
    match session {
        Some(session) => session.refractory_expired().await,
        None => std::future::pending().await,
    }
}

async fn acquisition(
    pending: &mut Option<PendingActivation>,
) -> std::result::Result<Box<dyn FrameSource>, MediaError> {
    match pending {
        Some(pending) => (&mut pending.acquire).await,
        None => std::future::pending().await,
    }
}
