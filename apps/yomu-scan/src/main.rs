//! Yomu Scan Binary
//!
//! Runs a scanner against a synthetic camera or a still image and prints
//! every new payload to stdout.
//!
//! ## Usage
//!
//! ```bash
//! # Synthetic camera (development)
//! yomu-scan --test-source --payload "HELLO"
//!
//! # Decode QR codes from an image file
//! yomu-scan --image ./code.png
//!
//! # Tune the capture loop
//! YOMU_SCAN_PERIOD=5 YOMU_REFRACTORY_MS=2000 yomu-scan --image ./code.png
//! ```

#[cfg(not(any(feature = "test-source", feature = "still")))]
compile_error!("yomu-scan needs the `test-source` or `still` feature");

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use yomu::capture::DEFAULT_REFRESH_HZ;
use yomu::{DisplayClock, ScanEvent, Scanner, ScannerConfig};

#[cfg(feature = "still")]
use std::path::PathBuf;

/// Where frames come from
enum Source {
    #[cfg(feature = "test-source")]
    Test { payload: Option<String> },
    #[cfg(feature = "still")]
    Still(PathBuf),
}

/// Scanner configuration from environment/args
struct Config {
    scanner: ScannerConfig,
    /// Frame ticks per second
    fps: u32,
    source: Source,
}

impl Config {
    fn from_env() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let flag_value = |flag: &str| {
            args.iter()
                .position(|arg| arg == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        let defaults = ScannerConfig::default();
        let scanner = ScannerConfig {
            scan_period: env_parse("YOMU_SCAN_PERIOD").unwrap_or(defaults.scan_period),
            refractory_period: env_parse("YOMU_REFRACTORY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.refractory_period),
            capture_image: env_flag("YOMU_CAPTURE_IMAGE").unwrap_or(defaults.capture_image),
            background_scan: env_flag("YOMU_BACKGROUND_SCAN")
                .unwrap_or(defaults.background_scan),
            ..defaults
        };
        scanner.validate().context("Invalid YOMU_* configuration")?;

        let fps = env_parse("YOMU_FPS").unwrap_or(DEFAULT_REFRESH_HZ);
        if fps == 0 {
            bail!("YOMU_FPS must be at least 1");
        }

        let image = flag_value("--image");
        let test_source = args.iter().any(|arg| arg == "--test-source");
        let payload = flag_value("--payload");

        let source = match image {
            #[cfg(feature = "still")]
            Some(path) if !test_source => Source::Still(PathBuf::from(path)),
            #[cfg(not(feature = "still"))]
            Some(_) if !test_source => bail!("--image requires the `still` feature"),
            _ => test_source_with(payload)?,
        };

        Ok(Self {
            scanner,
            fps,
            source,
        })
    }
}

#[cfg(feature = "test-source")]
fn test_source_with(payload: Option<String>) -> Result<Source> {
    Ok(Source::Test { payload })
}

#[cfg(not(feature = "test-source"))]
fn test_source_with(_payload: Option<String>) -> Result<Source> {
    bail!("no frame source: pass --image <path>")
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("yomu=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;

    let builder = Scanner::builder(config.scanner.clone()).scheduler(DisplayClock::new(config.fps));
    let (scanner, mut events) = match config.source {
        #[cfg(feature = "test-source")]
        Source::Test { payload } => {
            use yomu::{TestCamera, TestPatternDecoder, TestSourceConfig};

            let camera = Arc::new(TestCamera::new("test-pattern", TestSourceConfig::default()));
            camera.set_payload(payload);
            info!("Using synthetic camera");
            builder.camera(camera).decoder(TestPatternDecoder).spawn()
        }
        #[cfg(feature = "still")]
        Source::Still(path) => {
            info!(path = %path.display(), "Using still image");
            builder
                .camera(Arc::new(yomu::StillCamera::new(path)))
                .decoder(yomu::QrDecoder::new())
                .spawn()
        }
    }
    .context("Failed to create scanner")?;

    let transition = scanner.start(None).await.context("Scanner task exited")?;
    if transition.is_rejected() {
        warn!(?transition, "Scanner did not activate");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ScanEvent::Scan(result)) => {
                    info!(content = %result.content, image = result.image.is_some(), "Scanned");
                    println!("{}", result.content);
                }
                Some(ScanEvent::Active) => info!("Scanning"),
                Some(ScanEvent::Inactive) => info!("Scanner inactive"),
                Some(ScanEvent::Error(e)) => warn!(error = %e, "Scanner error"),
                None => break,
            },
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    scanner.stop().await?;
    let stats = scanner.stats().await?;
    info!(
        ticks = stats.ticks,
        attempts = stats.attempts,
        results = stats.results,
        duplicates = stats.duplicates,
        "Scanner stopped"
    );

    Ok(())
}
