use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::auth::user_fingerprint;
use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limiter keyed by endpoint and account
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    SyncPush,
    SyncRead,
}

#[derive(Default)]
struct RateLimitMetrics {
    push_allowed: AtomicU64,
    push_limited: AtomicU64,
    read_allowed: AtomicU64,
    read_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub push_allowed: u64,
    pub push_limited: u64,
    pub read_allowed: u64,
    pub read_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.rate_limit_window, config.sync_rate_limit_per_window)
    }

    fn new(window: Duration, limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Rate limit exceeded for sync endpoint",
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            push_allowed: self.metrics.push_allowed.load(Ordering::Relaxed),
            push_limited: self.metrics.push_limited.load(Ordering::Relaxed),
            read_allowed: self.metrics.read_allowed.load(Ordering::Relaxed),
            read_limited: self.metrics.read_limited.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::SyncPush, true) => &self.metrics.push_allowed,
            (ProtectedEndpoint::SyncPush, false) => &self.metrics.push_limited,
            (ProtectedEndpoint::SyncRead, true) => &self.metrics.read_allowed,
            (ProtectedEndpoint::SyncRead, false) => &self.metrics.read_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SyncPush => "sync_push",
            Self::SyncRead => "sync_read",
        }
    }
}
