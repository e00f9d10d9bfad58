//! Logging setup and request/response tracing
//!
//! All diagnostics go through the `log` facade and end up on stderr, so stdout
//! carries nothing but register values. `CallbackLogger` interprets Modbus
//! requests and responses for the client's trace output.

use std::sync::Arc;
use std::str::FromStr;

use crate::error::{ModbusError, ModbusResult};

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

/// Logging mode for packet display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show raw PDU bytes only
    Raw,
    /// Show interpreted fields
    Interpreted,
    /// Show both raw and interpreted data
    Both,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger that forwards to the `log` facade
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| match level {
            LogLevel::Error => log::error!("{}", message),
            LogLevel::Warn => log::warn!("{}", message),
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Debug => log::debug!("{}", message),
        });
        Self::new(Some(callback), LogLevel::Debug)
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Check if a message at the given level should be logged
    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log a Modbus request
    pub fn log_request(&self, slave_id: u8, function_code: u8, address: u16, quantity: u16, data: &[u8]) {
        if matches!(self.mode, LoggingMode::Interpreted | LoggingMode::Both) {
            let detail = match function_code {
                0x06 if data.len() >= 2 => {
                    let value = u16::from_be_bytes([data[0], data[1]]);
                    format!("Value: {} (0x{:04X})", value, value)
                }
                _ => format!("Quantity: {}", quantity),
            };
            self.debug(&format!(
                "Modbus Request -> Slave: {}, Function: {} (0x{:02X}), Address: {}, {}",
                slave_id,
                Self::function_name(function_code),
                function_code,
                address,
                detail
            ));
        }

        if matches!(self.mode, LoggingMode::Raw | LoggingMode::Both) {
            let mut pdu = vec![function_code];
            pdu.extend_from_slice(&address.to_be_bytes());
            if function_code == 0x06 {
                pdu.extend_from_slice(data);
            } else {
                pdu.extend_from_slice(&quantity.to_be_bytes());
            }
            self.debug(&format!("Modbus Request -> Slave: {}, PDU: {}", slave_id, hex::encode_upper(&pdu)));
        }
    }

    /// Log a Modbus response
    pub fn log_response(&self, slave_id: u8, function_code: u8, data: &[u8]) {
        if matches!(self.mode, LoggingMode::Interpreted | LoggingMode::Both) {
            self.debug(&format!(
                "Modbus Response <- Slave: {}, Function: {} (0x{:02X}), {}",
                slave_id,
                Self::function_name(function_code),
                function_code,
                Self::interpret_response_data(function_code, data)
            ));
        }

        if matches!(self.mode, LoggingMode::Raw | LoggingMode::Both) {
            let mut pdu = vec![function_code];
            pdu.extend_from_slice(data);
            self.debug(&format!("Modbus Response <- Slave: {}, PDU: {}", slave_id, hex::encode_upper(&pdu)));
        }
    }

    /// Get human-readable function name
    fn function_name(function_code: u8) -> &'static str {
        match function_code {
            0x03 => "Read Holding Registers",
            0x06 => "Write Single Register",
            _ => "Unknown Function",
        }
    }

    /// Interpret response data based on function code
    fn interpret_response_data(function_code: u8, data: &[u8]) -> String {
        if data.is_empty() {
            return "No data".to_string();
        }

        match function_code {
            0x03 if data.len() >= 3 => {
                let byte_count = data[0];
                let registers: Vec<u16> = data[1..]
                    .chunks_exact(2)
                    .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                    .collect();
                format!("Byte count: {}, Registers: {:?}", byte_count, &registers[..registers.len().min(8)])
            }
            0x06 if data.len() >= 4 => {
                let address = u16::from_be_bytes([data[0], data[1]]);
                let value = u16::from_be_bytes([data[2], data[3]]);
                format!("Address: {}, Value: {} (0x{:04X})", address, value, value)
            }
            _ => format!("Data: {}", hex::encode(data)),
        }
    }
}

/// Parse a `-log-level` value
pub fn parse_level_filter(level: &str) -> ModbusResult<log::LevelFilter> {
    log::LevelFilter::from_str(level)
        .map_err(|_| ModbusError::configuration(format!("Unknown log level '{}'", level)))
}

/// Initialize process logging on stderr
///
/// `RUST_LOG`, when set, overrides the given default level.
pub fn init_logging(default_level: log::LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(default_level)
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .parse_default_env();
    let _ = builder.try_init();
}

/// Initialize simple logger for testing
pub fn init_test_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
