/// Utility functions and helpers for Modbus operations
///
/// Session metrics, operation timing, configuration validation and a few
/// formatting helpers used for diagnostics.

use std::time::{Duration, Instant};
use log::debug;
use crate::error::{ModbusError, ModbusResult};

/// Performance metrics for one query session
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeouts: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub avg_duration: Duration,
}

impl PerformanceMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful operation
    pub fn record_success(&mut self, duration: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_duration += duration;

        self.min_duration = Some(
            self.min_duration.map_or(duration, |min| min.min(duration))
        );
        self.max_duration = Some(
            self.max_duration.map_or(duration, |max| max.max(duration))
        );

        self.update_average();
    }

    /// Record a failed operation
    pub fn record_failure(&mut self, duration: Duration, timed_out: bool) {
        self.total_requests += 1;
        self.failed_requests += 1;
        if timed_out {
            self.timeouts += 1;
        }
        self.total_duration += duration;

        self.update_average();
    }

    fn update_average(&mut self) {
        if self.total_requests > 0 {
            self.avg_duration = self.total_duration / self.total_requests as u32;
        }
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
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

    /// Stop the timer and return duration
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        debug!("Operation '{}' completed in {:?}", self.operation_name, duration);
        duration
    }
}

/// Configuration validation utilities
pub mod validation {
    use super::*;

    /// Validate that `count` registers starting at `start` stay inside the address space
    pub fn validate_address_range(start: u16, count: u16) -> ModbusResult<()> {
        if (start as u32 + count as u32) > 65536 {
            return Err(ModbusError::configuration(format!(
                "Reading {} registers from {:#06x} runs past address 0xffff",
                count, start
            )));
        }

        Ok(())
    }

    /// Validate register count for read operations
    pub fn validate_register_count(count: u16) -> ModbusResult<()> {
        if count == 0 || count > crate::MAX_REGISTERS_PER_REQUEST {
            return Err(ModbusError::configuration(
                format!("Invalid register count: {} (must be 1-{})", count, crate::MAX_REGISTERS_PER_REQUEST)
            ));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format register values as hex
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers.iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }

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

    /// Format performance metrics as a table
    pub fn format_metrics(metrics: &PerformanceMetrics) -> String {
        format!(
            "Session Metrics:\n\
             ├─ Total Requests: {}\n\
             ├─ Successful: {} ({:.1}%)\n\
             ├─ Failed: {} ({} timeouts)\n\
             ├─ Average Duration: {}\n\
             ├─ Min Duration: {}\n\
             └─ Max Duration: {}",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.success_rate(),
            metrics.failed_requests,
            metrics.timeouts,
            format_duration(metrics.avg_duration),
            metrics.min_duration.map_or("N/A".to_string(), format_duration),
            metrics.max_duration.map_or("N/A".to_string(), format_duration),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_metrics() {
        let mut metrics = PerformanceMetrics::new();

        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(200));
        metrics.record_failure(Duration::from_millis(150), true);

        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.timeouts, 1);
        assert_eq!(metrics.min_duration, Some(Duration::from_millis(100)));
        assert_eq!(metrics.avg_duration, Duration::from_millis(150));
        assert!((metrics.success_rate() - 66.67).abs() < 0.1);
    }

    #[test]
    fn test_validation() {
        assert!(validation::validate_address_range(0, 10).is_ok());
        assert!(validation::validate_address_range(65530, 6).is_ok());
        assert!(validation::validate_address_range(65530, 10).is_err());

        assert!(validation::validate_register_count(1).is_ok());
        assert!(validation::validate_register_count(125).is_ok());
        assert!(validation::validate_register_count(0).is_err());
        assert!(validation::validate_register_count(126).is_err());
    }

    #[test]
    fn test_formatting() {
        let registers = vec![0x1234, 0x5678];
        assert_eq!(format::registers_to_hex(&registers), "1234 5678");

        assert_eq!(format::format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format::format_duration(Duration::from_millis(15)), "15ms");

        let metrics = PerformanceMetrics::new();
        assert!(format::format_metrics(&metrics).contains("Max Duration: N/A"));
    }
}
