//! Connection health derived from consecutive provider failures

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

/// Derived connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Connected,
    Degraded,
    Disconnected,
}

/// A consecutive-failure counter acting as a simple circuit-breaker signal
#[derive(Debug, Default)]
pub struct ConnectionHealth {
    consecutive_failures: AtomicU32,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider call succeeded; the counter resets
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// A provider call failed; returns the new failure count
    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Derive a status against the caller's thresholds
    pub fn status(&self, degraded_after: u32, disconnected_after: u32) -> HealthStatus {
        let failures = self.consecutive_failures();
        if failures >= disconnected_after {
            HealthStatus::Disconnected
        } else if failures >= degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Connected
        }
    }
}
