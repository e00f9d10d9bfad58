//! # Modbus Query - Single-Shot Modbus RTU Register Tool
//!
//! A small, dependable tool for reading (and optionally writing) holding
//! registers on a Modbus RTU field device such as a solar charge controller,
//! without a full SCADA stack. It is meant to be called from shell scripts and
//! by operators at a terminal.
//!
//! ## Features
//!
//! - **Address expressions**: `0x100,0x101=8,300` (hex or decimal, `=8` keeps the low byte)
//! - **Retry budget**: every address read and the optional write get a bounded number of attempts
//! - **Device locking**: an advisory lock on the serial path keeps concurrent invocations apart
//! - **Output modes**: `raw`, `hex`, `decimal` streamed as values arrive, or one `structured` JSON document
//!
//! ## Supported Function Codes
//!
//! | Code | Function |
//! |------|----------|
//! | 0x03 | Read Holding Registers |
//! | 0x06 | Write Single Register |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_query::{address, run_query, OutputFormat, QueryConfig};
//!
//! #[tokio::main]
//! async fn main() -> modbus_query::ModbusResult<()> {
//!     let config = QueryConfig::builder()
//!         .port("/dev/ttyUSB0")
//!         .addresses(address::parse_address_spec("0x100,0x101=8")?)
//!         .retries(3)
//!         .output(OutputFormat::Structured)
//!         .build()?;
//!
//!     let mut stdout = std::io::stdout();
//!     let report = run_query(&config, &mut stdout).await?;
//!     eprintln!("{} addresses answered", report.results.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / Config   │  address parsing, QueryConfig
//! └─────────────────┘
//!          │
//! ┌─────────────────┐    ┌─────────────────┐
//! │  Query Engine   │───►│ Output Formatter│
//! │ (write + reads) │    └─────────────────┘
//! └─────────────────┘
//!          │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Register Client │    │   Device Lock   │
//! └─────────────────┘    └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  RTU Transport  │
//! └─────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Modbus protocol definitions and message handling
pub mod protocol;

/// Serial RTU transport layer
pub mod transport;

/// Register client used by the query engine
pub mod client;

/// Address expression parsing
pub mod address;

/// Immutable query configuration
pub mod config;

/// Advisory lock on the serial device path
pub mod lock;

/// Read/write session with retry policy
pub mod engine;

/// Result aggregation and output formatting
pub mod output;

/// Command line surface
pub mod cli;

/// Utility functions and performance monitoring
pub mod utils;

/// Logging setup and frame tracing
pub mod logging;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use protocol::{ModbusRequest, ModbusResponse, ModbusFunction};
pub use transport::{ModbusTransport, RtuTransport, TransportStats};
pub use client::{RegisterClient, GenericModbusClient, ModbusRtuClient};
pub use address::AddressToken;
pub use config::{QueryConfig, QueryConfigBuilder, LockPolicy};
pub use lock::DeviceLock;
pub use engine::{run_query, run_session, QuerySession, QueryReport, AddressFailure, WriteStatus};
pub use output::{OutputFormat, ReadOutcome, QueryResult};
pub use utils::{PerformanceMetrics, OperationTimer};
pub use logging::{LogLevel, LogCallback, CallbackLogger, LoggingMode};

/// Default per-call transport timeout (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Pause after each register operation; the serial link needs time to settle
pub const PACING_DELAY_MS: u64 = 10;

/// Interval between device lock attempts
pub const LOCK_POLL_INTERVAL_MS: u64 = 10;

/// Default upper bound on waiting for the device lock
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum Modbus RTU frame size
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Query v{} - Modbus RTU holding register tool", VERSION)
}
