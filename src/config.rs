/// Immutable query configuration
///
/// A `QueryConfig` is assembled once, validated once, and then only ever
/// borrowed by the lock, the client and the engine. Nothing in a session
/// mutates it.

use std::time::Duration;

use crate::address::AddressToken;
use crate::error::{ModbusError, ModbusResult};
use crate::output::OutputFormat;
use crate::protocol::SlaveId;
use crate::utils::validation;
use crate::{
    DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_TIMEOUT_MS, LOCK_POLL_INTERVAL_MS, PACING_DELAY_MS,
};

/// Default serial device
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default Modbus slave id
pub const DEFAULT_DEVICE_ID: SlaveId = 1;

/// How long and how often to try for the device lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Pause between attempts
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits forever
    pub max_wait: Option<Duration>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(LOCK_POLL_INTERVAL_MS),
            max_wait: Some(Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS)),
        }
    }
}

/// Everything one invocation needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    port: String,
    device_id: SlaveId,
    baud_rate: u32,
    retries: u32,
    addresses: Vec<AddressToken>,
    count: u16,
    output: OutputFormat,
    write_value: Option<u16>,
    timeout: Duration,
    pacing: Duration,
    lock_policy: LockPolicy,
    trace_frames: bool,
}

impl QueryConfig {
    /// Start building a configuration from the documented defaults
    pub fn builder() -> QueryConfigBuilder {
        QueryConfigBuilder::default()
    }

    /// Serial device path
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Modbus slave id
    pub fn device_id(&self) -> SlaveId {
        self.device_id
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Attempts allowed per address read, and for the write
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Parsed addresses in query order
    pub fn addresses(&self) -> &[AddressToken] {
        &self.addresses
    }

    /// Registers read per address
    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    /// Value to write before reading; `Some` only in write mode
    pub fn write_value(&self) -> Option<u16> {
        self.write_value
    }

    pub fn is_write_mode(&self) -> bool {
        self.write_value.is_some()
    }

    /// Per-call transport timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Pause after each register operation
    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    /// Log raw RTU frames
    pub fn trace_frames(&self) -> bool {
        self.trace_frames
    }
}

/// Builder for [`QueryConfig`]
///
/// `build` enforces the configuration invariants; an invalid combination
/// never produces a `QueryConfig`.
#[derive(Debug, Clone)]
pub struct QueryConfigBuilder {
    port: String,
    device_id: SlaveId,
    baud_rate: u32,
    retries: u32,
    addresses: Vec<AddressToken>,
    count: u16,
    output: OutputFormat,
    write_value: Option<u16>,
    timeout: Duration,
    pacing: Duration,
    lock_policy: LockPolicy,
    trace_frames: bool,
}

impl Default for QueryConfigBuilder {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            device_id: DEFAULT_DEVICE_ID,
            baud_rate: DEFAULT_BAUD_RATE,
            retries: 1,
            addresses: vec![AddressToken::new(0x100, false)],
            count: 1,
            output: OutputFormat::default(),
            write_value: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            pacing: Duration::from_millis(PACING_DELAY_MS),
            lock_policy: LockPolicy::default(),
            trace_frames: false,
        }
    }
}

impl QueryConfigBuilder {
    pub fn port<S: Into<String>>(mut self, port: S) -> Self {
        self.port = port.into();
        self
    }

    pub fn device_id(mut self, device_id: SlaveId) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn addresses(mut self, addresses: Vec<AddressToken>) -> Self {
        self.addresses = addresses;
        self
    }

    pub fn count(mut self, count: u16) -> Self {
        self.count = count;
        self
    }

    pub fn output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    /// Enable write mode with the given value
    pub fn write_value(mut self, value: u16) -> Self {
        self.write_value = Some(value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn lock_policy(mut self, lock_policy: LockPolicy) -> Self {
        self.lock_policy = lock_policy;
        self
    }

    pub fn trace_frames(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    /// Validate and freeze the configuration
    ///
    /// # Errors
    ///
    /// `ModbusError::Configuration` when:
    /// - the retry budget is zero
    /// - the register count is outside 1-125, or runs past address 65535
    /// - no address was given
    /// - write mode targets anything other than exactly one address
    pub fn build(self) -> ModbusResult<QueryConfig> {
        if self.retries == 0 {
            return Err(ModbusError::configuration("Retry budget must be at least 1"));
        }

        if self.addresses.is_empty() {
            return Err(ModbusError::configuration("At least one address is required"));
        }

        validation::validate_register_count(self.count)?;
        for token in &self.addresses {
            validation::validate_address_range(token.address, self.count)?;
        }

        if self.write_value.is_some() && self.addresses.len() != 1 {
            return Err(ModbusError::configuration(format!(
                "Write can only target a single register, got {} addresses",
                self.addresses.len()
            )));
        }

        if self.timeout.is_zero() {
            return Err(ModbusError::configuration("Transport timeout must be positive"));
        }

        Ok(QueryConfig {
            port: self.port,
            device_id: self.device_id,
            baud_rate: self.baud_rate,
            retries: self.retries,
            addresses: self.addresses,
            count: self.count,
            output: self.output,
            write_value: self.write_value,
            timeout: self.timeout,
            pacing: self.pacing,
            lock_policy: self.lock_policy,
            trace_frames: self.trace_frames,
        })
    }
}
