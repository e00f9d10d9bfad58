//! # Modbus Query Error Handling
//!
//! This module provides the error type shared by every layer of the query tool:
//! address parsing, configuration, device locking, the RTU transport and the
//! output formatter.
//!
//! ## Error Categories
//!
//! ### Startup Errors (fatal)
//! - **Invalid Address Format**: a segment of the `-address` expression is malformed
//! - **Invalid Numeric Literal**: the `-value` literal is malformed
//! - **Invalid Output Format**: unknown `-output-as` value
//! - **Configuration Errors**: inconsistent flag combinations
//!
//! ### Session Errors (fatal)
//! - **Lock Timeout**: the serial device stayed locked longer than the allowed wait
//! - **Connection Errors**: the serial port could not be opened
//!
//! ### Transport Errors (recoverable)
//! - **Timeout Errors**: the device did not answer within the per-call timeout
//! - **I/O, Frame, CRC, Protocol and Exception errors**: everything else the link
//!   can report; retried exactly like timeouts but logged
//!
//! ## Retry Classification
//!
//! ```rust
//! use modbus_query::ModbusError;
//!
//! let err = ModbusError::timeout("read holding registers", 5000);
//! assert!(err.is_timeout());
//!
//! let err = ModbusError::exception(0x03, 0x02);
//! assert!(!err.is_timeout());
//! ```

use thiserror::Error;

/// Result type alias for Modbus query operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Error type for every stage of a query session
///
/// Variants are split into fatal startup/session errors, which terminate the
/// run, and transport errors, which only consume one attempt of the retry
/// budget of the operation that produced them.
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// Malformed segment in an address expression
    ///
    /// # Examples
    /// - `abc` (not a number)
    /// - `0x10000` (does not fit in 16 bits)
    /// - `256=16` (only `=8` is a valid suffix)
    #[error("Invalid address format '{token}': {reason}")]
    InvalidAddressFormat { token: String, reason: String },

    /// Malformed numeric literal (write value)
    #[error("Invalid numeric literal '{literal}': {reason}")]
    InvalidNumericLiteral { literal: String, reason: String },

    /// Unknown output format name
    #[error("Output format invalid: '{value}' (expected hex, decimal, raw or structured)")]
    InvalidOutputFormat { value: String },

    /// Configuration errors
    ///
    /// # Examples
    /// - Write mode with more than one address
    /// - Zero retry budget
    /// - Register count outside 1-125
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A single lock attempt failed (contention or open failure)
    #[error("Lock acquisition failed for {path}: {message}")]
    LockAcquisition { path: String, message: String },

    /// The device lock could not be obtained within the allowed wait
    #[error("Timed out after {waited_ms}ms waiting for lock on {path}")]
    LockTimeout { path: String, waited_ms: u64 },

    /// I/O related errors (serial, stdout)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// Raised when the serial port cannot be opened or is no longer open.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Timeout errors
    ///
    /// The device did not answer within the transport's per-call timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Protocol-level errors
    ///
    /// # Examples
    /// - Response from another slave id
    /// - Byte count not matching the requested quantity
    /// - Write echo not matching the request
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Invalid function code
    #[error("Invalid function code: {code}")]
    InvalidFunction { code: u8 },

    /// Invalid data value
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// CRC validation failure
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Modbus exception response
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Slave Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Slave Device Busy
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Frame parsing errors
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Structured output could not be produced
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl ModbusError {
    /// Create an invalid address format error
    ///
    /// # Arguments
    ///
    /// * `token` - The offending segment of the address expression
    /// * `reason` - Why the segment was rejected
    pub fn invalid_address_format<T: Into<String>, R: Into<String>>(token: T, reason: R) -> Self {
        Self::InvalidAddressFormat {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid numeric literal error
    pub fn invalid_numeric_literal<T: Into<String>, R: Into<String>>(literal: T, reason: R) -> Self {
        Self::InvalidNumericLiteral {
            literal: literal.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid output format error
    pub fn invalid_output_format<S: Into<String>>(value: S) -> Self {
        Self::InvalidOutputFormat { value: value.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a lock acquisition error for a single failed attempt
    pub fn lock_acquisition<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::LockAcquisition {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a lock timeout error
    ///
    /// # Arguments
    ///
    /// * `path` - Device path whose lock could not be obtained
    /// * `waited_ms` - How long the caller waited before giving up
    pub fn lock_timeout<P: Into<String>>(path: P, waited_ms: u64) -> Self {
        Self::LockTimeout {
            path: path.into(),
            waited_ms,
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a CRC mismatch error
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a Modbus exception error
    ///
    /// Maps standard exception codes to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Check if the error is a transport timeout
    ///
    /// Timeouts are retried silently by the register reader; every other
    /// transport error is logged before the next attempt.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
///
/// The elapsed error carries no duration; callers that know the configured
/// timeout build `ModbusError::timeout` directly.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}
