//! Per-client request throttling

use crate::config::RateLimitSettings;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    pub window: Duration,
    /// Request body size limit in bytes
    pub max_body_size: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitSettings::default().into()
    }
}

impl From<RateLimitSettings> for RateLimitConfig {
    fn from(settings: RateLimitSettings) -> Self {
        Self {
            max_requests: settings.max_requests,
            window: Duration::from_secs(settings.window_secs),
            max_body_size: settings.max_body_size,
        }
    }
}

/// Fixed window counter per client IP
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    /// IP -> (requests in window, window start)
    windows: Mutex<HashMap<String, (u32, Instant)>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a request from the given IP should be allowed
    pub async fn check(&self, ip: &str) -> Result<(), RateLimitError> {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        let entry = windows.entry(ip.to_string()).or_insert((0, now));

        if now.duration_since(entry.1) > self.config.window {
            *entry = (1, now);
            return Ok(());
        }

        if entry.0 >= self.config.max_requests {
            let remaining = self
                .config
                .window
                .saturating_sub(now.duration_since(entry.1));
            return Err(RateLimitError::Exceeded {
                retry_after: remaining,
            });
        }

        entry.0 += 1;
        Ok(())
    }

    /// Drop windows that expired long ago
    pub async fn cleanup(&self) {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let window = self.config.window;

        windows.retain(|_, (_, start)| now.duration_since(*start) <= window * 2);
    }

    pub async fn tracked_clients(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    Exceeded { retry_after: Duration },
}
