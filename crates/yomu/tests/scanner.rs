//! Scanner controller regression suite
//!
//! Drives a real scanner task with a scripted camera, a decoder that reads
//! whatever the "scene" currently shows, and host-driven frame ticks, all
//! on paused tokio time:
//!
//! - Lifecycle transitions, activation vetoes and acquisition failures
//! - Cadence and refractory deduplication of results
//! - Camera start/stop pairing across restarts, visibility and shutdown
//!
//! Run: `cargo test -p yomu --test scanner`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use yomu::{
    Camera, CameraRef, DecodeError, FrameSource, FrameTrigger, Geometry, LifecycleEvent,
    ManualClock, MediaError, PixelBuffer, Rejection, ScanError, ScanEvent, ScanState, Scanner,
    ScannerConfig, Transition, VideoSurface, Visibility, VisibilityController,
};

// ── Scripted camera ──────────────────────────────────────────────────

struct FakeCamera {
    id: String,
    latency: Duration,
    fail_with: Mutex<Option<MediaError>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeCamera {
    fn new(id: &str) -> Arc<Self> {
        Self::with_latency(id, Duration::from_millis(10))
    }

    fn with_latency(id: &str, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            latency,
            fail_with: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    fn fail_with(&self, err: MediaError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for FakeCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<Box<dyn FrameSource>, MediaError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(Box::new(FakeStream))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeStream;

impl FrameSource for FakeStream {
    fn geometry(&self) -> Geometry {
        Geometry::new(4, 4)
    }

    fn render(&mut self, buf: &mut PixelBuffer) -> bool {
        buf.as_bytes_mut().fill(0x80);
        true
    }
}

// ── Harness ──────────────────────────────────────────────────────────

/// What the camera is currently pointed at.
#[derive(Clone, Default)]
struct Scene(Arc<Mutex<Option<String>>>);

impl Scene {
    fn show(&self, content: &str) {
        *self.0.lock().unwrap() = Some(content.to_string());
    }

    fn clear(&self) {
        *self.0.lock().unwrap() = None;
    }
}

struct Harness {
    scanner: Scanner,
    events: yomu::EventReceiver,
    trigger: FrameTrigger,
    camera: Arc<FakeCamera>,
    scene: Scene,
    visibility: VisibilityController,
}

fn harness(config: ScannerConfig) -> Harness {
    harness_with(config, FakeCamera::new("cam-0"))
}

fn harness_with(config: ScannerConfig, camera: Arc<FakeCamera>) -> Harness {
    let scene = Scene::default();
    let seen = scene.clone();
    let (trigger, clock) = ManualClock::new();
    let (visibility, feed) = VisibilityController::new(Visibility::Visible);

    let (scanner, events) = Scanner::builder(config)
        .camera(camera.clone())
        .decoder(move |_: &PixelBuffer| -> Result<Option<String>, DecodeError> {
            Ok(seen.0.lock().unwrap().clone())
        })
        .scheduler(clock)
        .visibility(feed)
        .spawn()
        .unwrap();

    Harness {
        scanner,
        events,
        trigger,
        camera,
        scene,
        visibility,
    }
}

impl Harness {
    /// Round trip through the controller: everything sent before this
    /// call (ticks, visibility changes, commands) has been handled.
    async fn settle(&self) {
        self.scanner.stats().await.unwrap();
    }

    /// Deliver `n` display refreshes, each handled before the next is sent
    /// since pending ticks coalesce.
    async fn tick(&self, n: usize) {
        for _ in 0..n {
            assert!(self.trigger.tick());
            self.settle().await;
        }
    }

    /// Events emitted so far.
    fn drain(&mut self) -> Vec<ScanEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn scans(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                ScanEvent::Scan(result) => Some(result.content),
                _ => None,
            })
            .collect()
    }

    async fn next_event(&mut self) -> ScanEvent {
        tokio::time::timeout(Duration::from_secs(60), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Issue `start` from another task so its acquisition can be
    /// interrupted.
    fn start_in_background(&self) -> JoinHandle<yomu::Result<Transition>> {
        let scanner = self.scanner.clone();
        tokio::spawn(async move { scanner.start(None).await })
    }

    /// Wait until a camera acquisition is in flight.
    async fn wait_activating(&self) {
        while !self.scanner.stats().await.unwrap().activating {
            tokio::task::yield_now().await;
        }
    }

    async fn start_active(&mut self) {
        let transition = self.scanner.start(None).await.unwrap();
        assert_eq!(
            transition,
            Transition::Committed {
                from: ScanState::Started,
                to: ScanState::Active
            }
        );
        assert_eq!(self.drain(), vec![ScanEvent::Inactive, ScanEvent::Active]);
    }
}

fn config() -> ScannerConfig {
    ScannerConfig::default()
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn construction_emits_inactive() {
    let mut h = harness(config());
    assert_eq!(h.next_event().await, ScanEvent::Inactive);
    assert_eq!(h.scanner.state(), ScanState::Stopped);
    assert_eq!(h.camera.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_activates_automatically() {
    let mut h = harness(config());
    h.start_active().await;

    assert_eq!(h.scanner.state(), ScanState::Active);
    assert!(h.scanner.surface().is_attached());
    assert_eq!((h.camera.starts(), h.camera.stops()), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn stop_while_stopped_is_a_no_op() {
    let mut h = harness(config());
    h.scanner.stop().await.unwrap();
    h.settle().await;

    assert_eq!(h.drain(), vec![ScanEvent::Inactive]);
    assert_eq!(h.scanner.state(), ScanState::Stopped);
    assert_eq!(h.camera.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_releases_camera_once() {
    let mut h = harness(config());
    h.start_active().await;

    h.scanner.stop().await.unwrap();
    h.scanner.stop().await.unwrap();

    assert_eq!(h.drain(), vec![ScanEvent::Inactive]);
    assert_eq!(h.scanner.state(), ScanState::Stopped);
    assert!(!h.scanner.surface().is_attached());
    assert_eq!((h.camera.starts(), h.camera.stops()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn restart_stops_before_starting_again() {
    let mut h = harness(config());
    h.start_active().await;

    let transition = h.scanner.start(None).await.unwrap();
    assert!(transition.is_committed());
    assert_eq!(h.drain(), vec![ScanEvent::Inactive, ScanEvent::Active]);
    assert_eq!((h.camera.starts(), h.camera.stops()), (2, 1));
}

#[tokio::test(start_paused = true)]
async fn deactivate_and_reactivate_through_handle() {
    let mut h = harness(config());
    h.start_active().await;

    let transition = h.scanner.deactivate().await.unwrap();
    assert_eq!(
        transition,
        Transition::Committed {
            from: ScanState::Active,
            to: ScanState::Inactive
        }
    );
    assert_eq!(h.drain(), vec![ScanEvent::Inactive]);
    assert_eq!(h.camera.stops(), 1);

    let transition = h.scanner.activate().await.unwrap();
    assert_eq!(transition.state(), ScanState::Active);
    assert_eq!(h.drain(), vec![ScanEvent::Active]);
    assert_eq!(h.camera.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn illegal_events_are_rejected_without_side_effects() {
    let mut h = harness(config());

    let transition = h.scanner.activate().await.unwrap();
    assert_eq!(
        transition,
        Transition::Rejected {
            from: ScanState::Stopped,
            event: LifecycleEvent::Activate,
            reason: Rejection::NotPermitted
        }
    );
    let transition = h.scanner.deactivate().await.unwrap();
    assert_eq!(transition.rejection(), Some(&Rejection::NotPermitted));

    assert_eq!(h.drain(), vec![ScanEvent::Inactive]);
    assert_eq!(h.camera.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn watch_state_follows_transitions() {
    let mut h = harness(config());
    let mut state = h.scanner.watch_state();
    assert_eq!(*state.borrow_and_update(), ScanState::Stopped);

    h.start_active().await;
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), ScanState::Active);

    h.scanner.stop().await.unwrap();
    assert_eq!(*state.borrow_and_update(), ScanState::Stopped);
}

// ── Activation failures ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn media_error_aborts_activation() {
    let camera = FakeCamera::new("cam-0");
    camera.fail_with(MediaError::PermissionDenied);
    let mut h = harness_with(config(), camera);

    let transition = h.scanner.start(None).await.unwrap();
    assert_eq!(
        transition.rejection(),
        Some(&Rejection::Acquisition(MediaError::PermissionDenied))
    );
    assert_eq!(h.scanner.state(), ScanState::Started);
    assert_eq!(
        h.drain(),
        vec![
            ScanEvent::Inactive,
            ScanEvent::Error(ScanError::MediaAcquisition(MediaError::PermissionDenied)),
        ]
    );
    assert_eq!(h.camera.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_camera_is_reported() {
    let (_trigger, clock) = ManualClock::new();
    let (scanner, mut events) = Scanner::builder(config())
        .decoder(|_: &PixelBuffer| -> Result<Option<String>, DecodeError> { Ok(None) })
        .scheduler(clock)
        .spawn()
        .unwrap();

    let transition = scanner.start(None).await.unwrap();
    assert_eq!(transition.rejection(), Some(&Rejection::NoCamera));
    assert_eq!(scanner.state(), ScanState::Started);

    assert_eq!(events.recv().await, Some(ScanEvent::Inactive));
    assert_eq!(events.recv().await, Some(ScanEvent::Error(ScanError::NoCamera)));
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_acquisition() {
    let camera = FakeCamera::with_latency("slow", Duration::from_secs(1));
    let mut h = harness_with(config(), camera);

    let start = h.start_in_background();
    h.wait_activating().await;

    h.scanner.stop().await.unwrap();
    let transition = start.await.unwrap().unwrap();
    assert_eq!(transition.rejection(), Some(&Rejection::Cancelled));

    assert_eq!(h.scanner.state(), ScanState::Stopped);
    assert_eq!(h.drain(), vec![ScanEvent::Inactive]);
    assert_eq!((h.camera.starts(), h.camera.stops()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn restart_cancels_in_flight_acquisition() {
    let camera = FakeCamera::with_latency("slow", Duration::from_secs(1));
    let mut h = harness_with(config(), camera);

    let first = h.start_in_background();
    h.wait_activating().await;

    let second = h.scanner.start(None).await.unwrap();
    assert!(second.is_committed());
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.rejection(), Some(&Rejection::Cancelled));

    assert_eq!(h.scanner.state(), ScanState::Active);
    assert_eq!(h.drain(), vec![ScanEvent::Inactive, ScanEvent::Active]);
    assert_eq!((h.camera.starts(), h.camera.stops()), (2, 1));
}

// ── Visibility ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn hiding_cancels_in_flight_acquisition() {
    let camera = FakeCamera::with_latency("slow", Duration::from_secs(1));
    let mut h = harness_with(config(), camera);

    let start = h.start_in_background();
    h.wait_activating().await;

    h.visibility.hide();
    h.settle().await;
    let transition = start.await.unwrap().unwrap();
    assert_eq!(transition.rejection(), Some(&Rejection::Cancelled));
    assert_eq!(h.scanner.state(), ScanState::Inactive);
    assert_eq!(h.drain(), vec![ScanEvent::Inactive]);
    assert_eq!(h.camera.stops(), 1);

    h.visibility.show();
    assert_eq!(h.next_event().await, ScanEvent::Active);
    assert_eq!(h.scanner.state(), ScanState::Active);
    assert_eq!((h.camera.starts(), h.camera.stops()), (2, 1));
}

#[tokio::test(start_paused = true)]
async fn hidden_host_vetoes_activation_until_shown() {
    let mut h = harness(config());
    h.visibility.hide();

    let transition = h.scanner.start(None).await.unwrap();
    assert_eq!(transition.rejection(), Some(&Rejection::Hidden));
    assert_eq!(h.scanner.state(), ScanState::Started);
    assert_eq!(h.camera.starts(), 0);

    h.visibility.show();
    assert_eq!(h.next_event().await, ScanEvent::Inactive);
    assert_eq!(h.next_event().await, ScanEvent::Active);
    assert_eq!(h.scanner.state(), ScanState::Active);
}

#[tokio::test(start_paused = true)]
async fn hiding_suspends_and_showing_resumes() {
    let mut h = harness(config());
    h.start_active().await;

    h.visibility.hide();
    assert_eq!(h.next_event().await, ScanEvent::Inactive);
    assert_eq!(h.scanner.state(), ScanState::Inactive);
    assert_eq!(h.camera.stops(), 1);

    h.visibility.show();
    assert_eq!(h.next_event().await, ScanEvent::Active);
    assert_eq!((h.camera.starts(), h.camera.stops()), (2, 1));
}

#[tokio::test(start_paused = true)]
async fn background_scan_ignores_visibility() {
    let mut h = harness(ScannerConfig {
        background_scan: true,
        ..config()
    });
    h.visibility.hide();
    h.start_active().await;

    h.visibility.show();
    h.visibility.hide();
    h.settle().await;
    assert!(h.drain().is_empty());
    assert_eq!(h.scanner.state(), ScanState::Active);
    assert_eq!(h.camera.stops(), 0);
}

// ── Capture loop ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn distinct_results_are_all_reported() {
    let mut h = harness(config());
    h.start_active().await;

    for content in ["A", "B", "A"] {
        h.scene.show(content);
        h.tick(1).await;
    }
    assert_eq!(h.scans(), vec!["A", "B", "A"]);
}

#[tokio::test(start_paused = true)]
async fn repeats_suppressed_until_refractory_elapses() {
    let mut h = harness(config());
    h.start_active().await;

    h.scene.show("A");
    h.tick(3).await;
    assert_eq!(h.scans(), vec!["A"]);

    tokio::time::advance(Duration::from_millis(4_999)).await;
    h.tick(1).await;
    assert!(h.scans().is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    h.tick(1).await;
    assert_eq!(h.scans(), vec!["A"]);

    let stats = h.scanner.stats().await.unwrap();
    assert_eq!(stats.duplicates, 3);
    assert_eq!(stats.results, 2);
}

#[tokio::test(start_paused = true)]
async fn same_payload_reported_again_after_short_refractory() {
    let mut h = harness(ScannerConfig {
        scan_period: 1,
        refractory_period: Duration::from_millis(100),
        capture_image: false,
        ..config()
    });
    h.start_active().await;

    h.scene.show("ABC");
    h.tick(2).await;
    let first = h.drain();
    assert_eq!(first.len(), 1);
    match &first[0] {
        ScanEvent::Scan(result) => {
            assert_eq!(result.content, "ABC");
            assert!(result.image.is_none());
        }
        other => panic!("unexpected event {other:?}"),
    }

    tokio::time::advance(Duration::from_millis(101)).await;
    h.tick(18).await;
    assert_eq!(h.scans(), vec!["ABC"]);
}

#[tokio::test(start_paused = true)]
async fn scan_period_thins_attempts() {
    let mut h = harness(ScannerConfig {
        scan_period: 3,
        ..config()
    });
    h.start_active().await;

    h.tick(10).await;
    let stats = h.scanner.stats().await.unwrap();
    assert_eq!(stats.ticks, 10);
    assert_eq!(stats.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn blank_frames_emit_nothing() {
    let mut h = harness(config());
    h.start_active().await;

    h.scene.clear();
    h.tick(5).await;
    assert!(h.drain().is_empty());
    assert_eq!(h.scanner.stats().await.unwrap().attempts, 5);
}

#[tokio::test(start_paused = true)]
async fn captured_image_accompanies_result() {
    let mut h = harness(ScannerConfig {
        capture_image: true,
        ..config()
    });
    h.start_active().await;

    h.scene.show("PHOTO");
    h.tick(1).await;
    let result = h
        .drain()
        .into_iter()
        .find_map(|event| match event {
            ScanEvent::Scan(result) => Some(result),
            _ => None,
        })
        .unwrap();
    let image = result.image.unwrap();
    assert_eq!(image.geometry, Geometry::new(4, 4));
}

#[tokio::test(start_paused = true)]
async fn no_results_while_inactive() {
    let mut h = harness(config());
    h.start_active().await;
    h.scanner.deactivate().await.unwrap();
    h.drain();

    h.scene.show("A");
    h.tick(3).await;
    assert!(h.scans().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scan_now_bypasses_suppression() {
    let mut h = harness(config());
    h.start_active().await;

    h.scene.show("A");
    h.tick(1).await;
    assert_eq!(h.scans(), vec!["A"]);

    let result = h.scanner.scan_now().await.unwrap();
    assert_eq!(result.map(|r| r.content), Some("A".to_string()));
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn non_continuous_scanner_only_scans_on_request() {
    let mut h = harness(ScannerConfig {
        continuous: false,
        ..config()
    });
    h.start_active().await;

    h.scene.show("A");
    h.tick(3).await;
    assert!(h.scans().is_empty());

    let result = h.scanner.scan_now().await.unwrap();
    assert_eq!(result.map(|r| r.content), Some("A".to_string()));
}

// ── Camera reassignment and shutdown ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn switching_camera_restarts_scanning() {
    let mut h = harness(config());
    h.start_active().await;

    let other = FakeCamera::new("cam-1");
    h.scanner.set_camera(other.clone()).await.unwrap();
    assert_eq!(h.next_event().await, ScanEvent::Inactive);
    assert_eq!(h.next_event().await, ScanEvent::Active);

    assert_eq!((h.camera.starts(), h.camera.stops()), (1, 1));
    assert_eq!(other.starts(), 1);
    assert_eq!(
        h.scanner.stats().await.unwrap().camera.as_deref(),
        Some("cam-1")
    );

    let same: CameraRef = other.clone();
    h.scanner.set_camera(same).await.unwrap();
    h.settle().await;
    assert!(h.drain().is_empty());
    assert_eq!(other.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn camera_set_while_stopped_is_used_on_start() {
    let mut h = harness(config());
    let other = FakeCamera::new("cam-1");
    h.scanner.set_camera(other.clone()).await.unwrap();
    h.start_active().await;

    assert_eq!(h.camera.starts(), 0);
    assert_eq!(other.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn camera_set_while_inactive_is_used_on_next_activation() {
    let mut h = harness(config());
    h.start_active().await;
    h.scanner.deactivate().await.unwrap();
    h.drain();

    let other = FakeCamera::new("cam-1");
    h.scanner.set_camera(other.clone()).await.unwrap();
    h.settle().await;
    assert!(h.drain().is_empty());
    assert_eq!(h.scanner.state(), ScanState::Inactive);
    assert_eq!(other.starts(), 0);

    let transition = h.scanner.activate().await.unwrap();
    assert_eq!(transition.state(), ScanState::Active);
    assert_eq!(h.drain(), vec![ScanEvent::Active]);
    assert_eq!(other.starts(), 1);
    assert_eq!((h.camera.starts(), h.camera.stops()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn camera_switch_restarts_pending_activation() {
    let camera = FakeCamera::with_latency("slow", Duration::from_secs(1));
    let mut h = harness_with(config(), camera);
    h.start_active().await;
    h.scanner.deactivate().await.unwrap();
    h.drain();

    let scanner = h.scanner.clone();
    let activate = tokio::spawn(async move { scanner.activate().await });
    h.wait_activating().await;

    let other = FakeCamera::new("cam-1");
    h.scanner.set_camera(other.clone()).await.unwrap();
    let transition = activate.await.unwrap().unwrap();
    assert_eq!(transition.rejection(), Some(&Rejection::Cancelled));

    assert_eq!(h.next_event().await, ScanEvent::Active);
    assert_eq!(h.scanner.state(), ScanState::Active);
    assert_eq!(other.starts(), 1);
    // One stop for the deactivation, one for the abandoned acquisition.
    assert_eq!((h.camera.starts(), h.camera.stops()), (2, 2));
    assert_eq!(
        h.scanner.stats().await.unwrap().camera.as_deref(),
        Some("cam-1")
    );
}

#[tokio::test(start_paused = true)]
async fn dropping_handles_releases_camera() {
    let Harness {
        scanner,
        mut events,
        camera,
        ..
    } = harness(config());
    scanner.start(None).await.unwrap();
    drop(scanner);

    let mut tail = Vec::new();
    while let Some(event) = events.recv().await {
        tail.push(event);
    }
    assert_eq!(
        tail,
        vec![ScanEvent::Inactive, ScanEvent::Active, ScanEvent::Inactive]
    );
    assert_eq!(camera.stops(), 1);
}

// ── Construction ─────────────────────────────────────────────────────

#[tokio::test]
async fn zero_scan_period_is_rejected() {
    let result = Scanner::builder(ScannerConfig {
        scan_period: 0,
        ..config()
    })
    .decoder(|_: &PixelBuffer| -> Result<Option<String>, DecodeError> { Ok(None) })
    .spawn();
    assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
}

#[tokio::test]
async fn surface_binds_to_one_scanner() {
    let surface = Arc::new(VideoSurface::new());
    let decoder = |_: &PixelBuffer| -> Result<Option<String>, DecodeError> { Ok(None) };

    let (_first, _events) = Scanner::builder(config())
        .surface(surface.clone())
        .decoder(decoder)
        .spawn()
        .unwrap();
    let second = Scanner::builder(config())
        .surface(surface.clone())
        .decoder(decoder)
        .spawn();
    assert!(matches!(second, Err(ScanError::SurfaceInUse)));
    assert!(surface.is_mirrored());
}
