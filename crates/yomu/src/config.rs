//! Scanner configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, ScanError};

/// Options recognised by [`Scanner`](crate::Scanner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Scheduling ticks between scan attempts (must be at least 1)
    pub scan_period: u32,
    /// How long an emitted payload is suppressed from being reported again
    #[serde(rename = "refractory_period_ms", with = "millis")]
    pub refractory_period: Duration,
    /// Attach a snapshot of the frame to each emitted result
    pub capture_image: bool,
    /// Keep scanning (and allow activation) while the host is hidden
    pub background_scan: bool,
    /// Scan on every eligible tick; when false only `scan_now` decodes
    pub continuous: bool,
    /// Mirror the preview when rendering the video surface
    pub mirror: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_period: 1,
            refractory_period: Duration::from_millis(5000),
            capture_image: false,
            background_scan: false,
            continuous: true,
            mirror: true,
        }
    }
}

impl ScannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject values the capture loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scan_period == 0 {
            return Err(ScanError::InvalidConfig(
                "scan_period must be a positive number of ticks".into(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
