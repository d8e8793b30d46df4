/// Utility functions and helpers for the monitor
///
/// This module contains input validation, poll cycle timing and duration
/// formatting.

use std::time::{Duration, Instant};
use log::{debug, info, warn};

/// Read metrics accumulated across poll cycles
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub completed_cycles: u64,
    pub aborted_cycles: u64,
    pub last_cycle_duration: Option<Duration>,
}

impl PerformanceMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful register read
    pub fn record_success(&mut self) {
        self.total_requests += 1;
        self.successful_requests += 1;
    }

    /// Record a failed register read
    pub fn record_failure(&mut self) {
        self.total_requests += 1;
        self.failed_requests += 1;
    }

    /// Record the end of a poll cycle
    pub fn record_cycle(&mut self, duration: Duration, completed: bool) {
        if completed {
            self.completed_cycles += 1;
        } else {
            self.aborted_cycles += 1;
        }
        self.last_cycle_duration = Some(duration);
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }

    /// Reset all metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    /// Start a new timer
    pub fn start(operation_name: &str) -> Self {
        debug!("Starting operation: {}", operation_name);
        Self {
            start: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    /// Stop timer and log result
    pub fn stop_and_log(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        if success {
            info!("Operation '{}' succeeded in {}", self.operation_name, format::format_duration(duration));
        } else {
            warn!("Operation '{}' failed after {}", self.operation_name, format::format_duration(duration));
        }
        duration
    }
}

/// Data validation utilities
pub mod validation {
    use crate::error::{MonitorError, MonitorResult};

    /// Largest register count in one read request
    pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

    /// Largest coil count in one read request
    pub const MAX_COILS_PER_REQUEST: u16 = 2000;

    /// Validate slave ID (1-247)
    pub fn validate_slave_id(slave_id: u8) -> MonitorResult<()> {
        if slave_id == 0 || slave_id > 247 {
            return Err(MonitorError::configuration(format!(
                "Invalid slave ID: {} (must be 1-247)",
                slave_id
            )));
        }
        Ok(())
    }

    /// Validate address range
    pub fn validate_address_range(start: u16, count: u16) -> MonitorResult<()> {
        if count == 0 || (start as u32 + count as u32) > 65536 {
            return Err(MonitorError::configuration(format!(
                "Invalid address range: start={}, count={}",
                start, count
            )));
        }
        Ok(())
    }

    /// Validate register count for read operations
    pub fn validate_register_count(count: u16) -> MonitorResult<()> {
        if count == 0 || count > MAX_REGISTERS_PER_REQUEST {
            return Err(MonitorError::configuration(format!(
                "Invalid register count: {} (must be 1-{})",
                count, MAX_REGISTERS_PER_REQUEST
            )));
        }
        Ok(())
    }

    /// Validate coil count for read operations
    pub fn validate_coil_count(count: u16) -> MonitorResult<()> {
        if count == 0 || count > MAX_COILS_PER_REQUEST {
            return Err(MonitorError::configuration(format!(
                "Invalid coil count: {} (must be 1-{})",
                count, MAX_COILS_PER_REQUEST
            )));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }

    /// Render a 10 character progress bar with percentage
    pub fn progress_bar(percent: u8) -> String {
        const BAR_LENGTH: usize = 10;
        let percent = percent.min(100);
        let filled = (BAR_LENGTH * percent as usize + 50) / 100;
        format!(
            "[{}{}] {}%",
            "=".repeat(filled),
            ">".repeat(BAR_LENGTH - filled),
            percent
        )
    }
}
