use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Running counters for one backend client. Updated on every completed
/// call, success or failure; derived statistics are computed on demand.
#[derive(Debug)]
pub struct Metrics {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_tokens: u64,
    total_latency: Duration,
    started_at: DateTime<Utc>,
}

/// Point-in-time view with the derived statistics callers actually want.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub total_tokens: u64,
    pub average_tokens_per_request: f64,
    pub total_latency_ms: u64,
    pub average_latency_ms: f64,
    pub requests_per_minute: f64,
    pub uptime_seconds: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_tokens: 0,
            total_latency: Duration::ZERO,
            started_at: Utc::now(),
        }
    }

    pub fn record(&mut self, success: bool, tokens: u32, latency: Duration) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        self.total_tokens += u64::from(tokens);
        self.total_latency += latency;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        let total = self.total_requests.max(1) as f64;
        let successful = self.successful_requests.max(1) as f64;

        MetricsSnapshot {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            success_rate: self.successful_requests as f64 / total,
            total_tokens: self.total_tokens,
            average_tokens_per_request: self.total_tokens as f64 / successful,
            total_latency_ms: self.total_latency.as_millis() as u64,
            average_latency_ms: self.total_latency.as_millis() as f64 / successful,
            requests_per_minute: (self.total_requests as f64 / uptime.max(1.0)) * 60.0,
            uptime_seconds: uptime,
        }
    }
}
