//! Last-result suppression window

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// The most recently reported payload and when it may be reported again.
#[derive(Debug, Clone)]
pub struct Refractory {
    period: Duration,
    last: Option<String>,
    expires_at: Option<Instant>,
}

impl Refractory {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: None,
            expires_at: None,
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Whether `content` was already reported and is still suppressed.
    pub fn is_duplicate(&self, content: &str) -> bool {
        match (&self.last, self.expires_at) {
            (Some(last), Some(deadline)) => last == content && Instant::now() < deadline,
            _ => false,
        }
    }

    /// Record a reported payload, restarting the window.
    pub fn record(&mut self, content: String) {
        self.last = Some(content);
        self.expires_at = Some(Instant::now() + self.period);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn is_armed(&self) -> bool {
        self.expires_at.is_some()
    }

    /// Resolves when the window closes; never if nothing is recorded.
    pub async fn expired(&self) {
        match self.expires_at {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Forget the last result and cancel the window.
    pub fn clear(&mut self) {
        self.last = None;
        self.expires_at = None;
    }
}
