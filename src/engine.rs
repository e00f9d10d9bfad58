//! # Query Engine
//!
//! Drives one session against one device:
//!
//! 1. optional write of a single register, retried up to the budget
//! 2. a read of every address in query order, each with its own budget
//! 3. read-back check of the written value
//! 4. final output
//!
//! Operations are strictly sequential. Every attempt that reaches the device
//! is followed by a short pacing delay so the serial line can settle.
//!
//! A failed write or an address that never answers does not end the session.
//! The former is reported as [`WriteStatus::Unacknowledged`], the latter as an
//! [`AddressFailure`]; neither appears in the printed results.

use std::io::Write;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::address::AddressToken;
use crate::client::{ModbusRtuClient, RegisterClient};
use crate::config::QueryConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::lock::DeviceLock;
use crate::output::{finish_output, QueryResult, ReadOutcome};
use crate::protocol::{data_utils, ModbusAddress};
use crate::utils::{format::{format_metrics, registers_to_hex}, OperationTimer, PerformanceMetrics};

/// An address whose retry budget ran out
#[derive(Debug, Clone)]
pub struct AddressFailure {
    pub address: ModbusAddress,
    pub attempts: u32,
    pub last_error: ModbusError,
}

/// Outcome of the write phase
#[derive(Debug, Clone)]
pub enum WriteStatus {
    /// The device echoed the write
    Acknowledged { attempts: u32 },
    /// Every attempt failed
    Unacknowledged { attempts: u32, last_error: ModbusError },
}

impl WriteStatus {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, WriteStatus::Acknowledged { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            WriteStatus::Acknowledged { attempts } | WriteStatus::Unacknowledged { attempts, .. } => *attempts,
        }
    }
}

/// Everything a finished session produced
#[derive(Debug, Clone)]
pub struct QueryReport {
    /// Successful reads, in query order
    pub results: QueryResult,
    /// Addresses that never answered
    pub failures: Vec<AddressFailure>,
    /// `None` unless the session was in write mode
    pub write: Option<WriteStatus>,
    pub metrics: PerformanceMetrics,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// One read/write session over a connected client
pub struct QuerySession<'a, C: RegisterClient> {
    config: &'a QueryConfig,
    client: &'a mut C,
    metrics: PerformanceMetrics,
}

impl<'a, C: RegisterClient> QuerySession<'a, C> {
    pub fn new(config: &'a QueryConfig, client: &'a mut C) -> Self {
        Self {
            config,
            client,
            metrics: PerformanceMetrics::new(),
        }
    }

    /// Run the whole session and print its output to `out`
    ///
    /// Only a failure to write to `out` ends the session early; device
    /// errors are absorbed by the retry budgets and show up in the report.
    pub async fn execute<W: Write>(mut self, out: &mut W) -> ModbusResult<QueryReport> {
        let started_at = Utc::now();
        let config = self.config;

        let write = self.write_phase().await;

        let mut results = QueryResult::new();
        let mut failures = Vec::new();
        for token in config.addresses() {
            match self.read_address(token, out).await? {
                Ok(outcome) => results.push(outcome),
                Err(failure) => failures.push(failure),
            }
        }

        if let Some(WriteStatus::Acknowledged { .. }) = write {
            self.verify_write(&results);
        }

        finish_output(config.output(), &results, out)?;

        debug!("{}", format_metrics(&self.metrics));

        Ok(QueryReport {
            results,
            failures,
            write,
            metrics: self.metrics,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Write the configured value to the single configured address
    ///
    /// Returns `None` outside write mode.
    pub async fn write_phase(&mut self) -> Option<WriteStatus> {
        let value = self.config.write_value()?;
        let token = *self.config.addresses().first()?;
        let budget = self.config.retries();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let timer = OperationTimer::start(&format!("write {}", token.address));
            let result = self.client.write_single_register(token.address, value).await;
            let elapsed = timer.stop();
            self.pace().await;

            match result {
                Ok(()) => {
                    self.metrics.record_success(elapsed);
                    info!("Wrote {:#06x} to {:#06x} (attempt {}/{})", value, token.address, attempt, budget);
                    return Some(WriteStatus::Acknowledged { attempts: attempt });
                }
                Err(e) => {
                    self.metrics.record_failure(elapsed, e.is_timeout());
                    warn!("Write to {:#06x} failed (attempt {}/{}): {}", token.address, attempt, budget, e);
                    if attempt >= budget {
                        warn!(
                            "Write of {:#06x} to {:#06x} was not acknowledged after {} attempt(s); reading anyway",
                            value, token.address, attempt
                        );
                        return Some(WriteStatus::Unacknowledged { attempts: attempt, last_error: e });
                    }
                }
            }
        }
    }

    /// Read one address within its retry budget
    ///
    /// Streaming formats print each value to `out` as soon as it is decoded.
    /// The outer error is reserved for output failures.
    pub async fn read_address<W: Write>(
        &mut self,
        token: &AddressToken,
        out: &mut W,
    ) -> ModbusResult<Result<ReadOutcome, AddressFailure>> {
        let budget = self.config.retries();
        let count = self.config.count();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let timer = OperationTimer::start(&format!("read {}", token));
            let result = self.client
                .read_holding_registers(token.address, count)
                .await
                .and_then(|payload| data_utils::bytes_to_registers(&payload, count));
            let elapsed = timer.stop();

            match result {
                Ok(words) => {
                    self.metrics.record_success(elapsed);
                    let values: Vec<u16> = words.into_iter().map(|word| token.apply_mask(word)).collect();
                    debug!("Read {} -> {} (attempt {}/{})", token, registers_to_hex(&values), attempt, budget);
                    let output = self.config.output();
                    if output.is_streaming() {
                        for &value in &values {
                            output.write_value(out, value)?;
                        }
                        out.flush()?;
                    }
                    self.pace().await;
                    return Ok(Ok(ReadOutcome { address: token.address, values }));
                }
                Err(e) => {
                    self.metrics.record_failure(elapsed, e.is_timeout());
                    if e.is_timeout() {
                        debug!("Read {} timed out (attempt {}/{})", token, attempt, budget);
                    } else {
                        warn!("Read {} failed (attempt {}/{}): {}", token, attempt, budget, e);
                    }
                    if attempt >= budget {
                        warn!("Giving up on {} after {} attempt(s): {}", token, attempt, e);
                        return Ok(Err(AddressFailure {
                            address: token.address,
                            attempts: attempt,
                            last_error: e,
                        }));
                    }
                }
            }
        }
    }

    /// Compare the first value read from the written address with what was written
    fn verify_write(&self, results: &QueryResult) {
        let (Some(value), Some(token)) = (self.config.write_value(), self.config.addresses().first()) else {
            return;
        };

        let Some(read_back) = results.find(token.address).and_then(|outcome| outcome.values.first()) else {
            return;
        };

        let expected = token.apply_mask(value);
        if *read_back != expected {
            warn!(
                "Read-back of {} is {:#06x}, expected {:#06x}",
                token, read_back, expected
            );
        }
    }

    async fn pace(&self) {
        tokio::time::sleep(self.config.pacing()).await;
    }
}

/// Run a session over an already connected client, then close it
pub async fn run_session<C: RegisterClient, W: Write>(
    config: &QueryConfig,
    client: &mut C,
    out: &mut W,
) -> ModbusResult<QueryReport> {
    let report = QuerySession::new(config, client).execute(out).await;

    let stats = client.get_stats();
    debug!(
        "Transport: {} requests, {} responses, {} errors, {} timeouts, {} bytes out, {} bytes in",
        stats.requests_sent,
        stats.responses_received,
        stats.errors,
        stats.timeouts,
        stats.bytes_sent,
        stats.bytes_received
    );

    if let Err(e) = client.close().await {
        warn!("Failed to close device link: {}", e);
    }

    report
}

/// Lock the device, open it, run a session and release everything
///
/// The lock is held from before the port opens until after it closes. All
/// resources are released on every exit path, including when the returned
/// future is dropped.
pub async fn run_query<W: Write>(config: &QueryConfig, out: &mut W) -> ModbusResult<QueryReport> {
    let _lock = DeviceLock::acquire(config.port(), &config.lock_policy()).await?;
    let mut client = ModbusRtuClient::connect(config)?;
    run_session(config, &mut client, out).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::address::parse_address_spec;
    use crate::output::OutputFormat;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Read(u16, u16),
        Write(u16, u16),
    }

    /// Client answering from a script, recording every call
    #[derive(Default)]
    struct StubClient {
        reads: VecDeque<ModbusResult<Vec<u8>>>,
        writes: VecDeque<ModbusResult<()>>,
        calls: Vec<Call>,
        closed: bool,
    }

    #[async_trait]
    impl RegisterClient for StubClient {
        async fn read_holding_registers(&mut self, address: u16, count: u16) -> ModbusResult<Vec<u8>> {
            self.calls.push(Call::Read(address, count));
            self.reads.pop_front().unwrap_or_else(|| Err(ModbusError::timeout("read", 5)))
        }

        async fn write_single_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
            self.calls.push(Call::Write(address, value));
            self.writes.pop_front().unwrap_or_else(|| Err(ModbusError::timeout("write", 5)))
        }

        async fn close(&mut self) -> ModbusResult<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn timeout() -> ModbusResult<Vec<u8>> {
        Err(ModbusError::timeout("read", 5))
    }

    fn config(spec: &str, retries: u32, output: OutputFormat) -> QueryConfig {
        QueryConfig::builder()
            .addresses(parse_address_spec(spec).unwrap())
            .retries(retries)
            .output(output)
            .pacing(Duration::ZERO)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let config = config("0x10", 3, OutputFormat::Decimal);
        let mut client = StubClient {
            reads: vec![timeout(), timeout(), Ok(vec![0x00, 0xFF])].into(),
            ..Default::default()
        };

        let mut out = Vec::new();
        let report = QuerySession::new(&config, &mut client).execute(&mut out).await.unwrap();

        assert_eq!(client.calls.len(), 3);
        assert_eq!(report.results.len(), 1);
        assert!(report.failures.is_empty());
        assert_eq!(report.metrics.timeouts, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "255 ");
    }

    #[tokio::test]
    async fn test_exhausted_budget_drops_address() {
        let config = config("0x10,0x20", 2, OutputFormat::Structured);
        let mut client = StubClient {
            reads: vec![
                timeout(),
                Err(ModbusError::exception(0x03, 0x02)),
                Ok(vec![0x00, 0x01]),
            ]
            .into(),
            ..Default::default()
        };

        let mut out = Vec::new();
        let report = QuerySession::new(&config, &mut client).execute(&mut out).await.unwrap();

        assert_eq!(client.calls, vec![Call::Read(0x10, 1), Call::Read(0x10, 1), Call::Read(0x20, 1)]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, 0x10);
        assert_eq!(report.failures[0].attempts, 2);
        assert!(matches!(report.failures[0].last_error, ModbusError::Exception { .. }));
        assert_eq!(String::from_utf8(out).unwrap(), "[{\"Address\":32,\"Values\":[1]}]\n");
    }

    #[tokio::test]
    async fn test_failure_keeps_error_of_final_attempt() {
        let config = QueryConfig::builder()
            .addresses(parse_address_spec("0x100").unwrap())
            .write_value(1)
            .retries(3)
            .output(OutputFormat::Decimal)
            .pacing(Duration::ZERO)
            .build()
            .unwrap();
        let mut client = StubClient {
            writes: vec![
                Err(ModbusError::exception(0x06, 0x02)),
                Err(ModbusError::timeout("write", 5)),
                Err(ModbusError::crc_mismatch(1, 2)),
            ]
            .into(),
            reads: vec![timeout(), Err(ModbusError::exception(0x03, 0x02)), timeout()].into(),
            ..Default::default()
        };

        let mut out = Vec::new();
        let report = QuerySession::new(&config, &mut client).execute(&mut out).await.unwrap();

        match report.write {
            Some(WriteStatus::Unacknowledged { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(last_error, ModbusError::CrcMismatch { .. }));
            }
            other => panic!("unexpected write status: {:?}", other),
        }
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].attempts, 3);
        assert!(report.failures[0].last_error.is_timeout());
        assert_eq!(client.calls.len(), 6);
    }

    #[tokio::test]
    async fn test_short_payload_consumes_attempt() {
        let config = QueryConfig::builder()
            .addresses(parse_address_spec("0x10").unwrap())
            .count(2)
            .retries(2)
            .output(OutputFormat::Hex)
            .pacing(Duration::ZERO)
            .build()
            .unwrap();
        let mut client = StubClient {
            reads: vec![Ok(vec![0x00, 0x01]), Ok(vec![0x12, 0x34, 0x00, 0x0A])].into(),
            ..Default::default()
        };

        let mut out = Vec::new();
        let report = QuerySession::new(&config, &mut client).execute(&mut out).await.unwrap();

        assert_eq!(client.calls.len(), 2);
        assert_eq!(report.results.outcomes()[0].values, vec![0x1234, 0x0A]);
        assert_eq!(String::from_utf8(out).unwrap(), "0x1234 0xa ");
    }

    #[tokio::test]
    async fn test_mask_applies_to_every_value() {
        let config = QueryConfig::builder()
            .addresses(parse_address_spec("0x10=8").unwrap())
            .count(2)
            .output(OutputFormat::Raw)
            .pacing(Duration::ZERO)
            .build()
            .unwrap();
        let mut client = StubClient {
            reads: vec![Ok(vec![0x12, 0x34, 0xAB, 0xCD])].into(),
            ..Default::default()
        };

        let mut out = Vec::new();
        let report = QuerySession::new(&config, &mut client).execute(&mut out).await.unwrap();

        assert_eq!(report.results.outcomes()[0].values, vec![0x34, 0xCD]);
        assert_eq!(String::from_utf8(out).unwrap(), "[0x00, 0x34] [0x00, 0xcd] ");
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let config = QueryConfig::builder()
            .addresses(parse_address_spec("0x100").unwrap())
            .write_value(42)
            .retries(2)
            .output(OutputFormat::Decimal)
            .pacing(Duration::ZERO)
            .build()
            .unwrap();
        let mut client = StubClient {
            writes: vec![Err(ModbusError::crc_mismatch(1, 2)), Ok(())].into(),
            reads: vec![Ok(vec![0x00, 0x2A])].into(),
            ..Default::default()
        };

        let mut out = Vec::new();
        let report = run_session(&config, &mut client, &mut out).await.unwrap();

        assert_eq!(
            client.calls,
            vec![Call::Write(0x100, 42), Call::Write(0x100, 42), Call::Read(0x100, 1)]
        );
        assert!(matches!(report.write, Some(WriteStatus::Acknowledged { attempts: 2 })));
        assert!(client.closed);
        assert_eq!(String::from_utf8(out).unwrap(), "42 ");
    }

    #[tokio::test]
    async fn test_failed_write_does_not_abort_reads() {
        let config = QueryConfig::builder()
            .addresses(parse_address_spec("0x100").unwrap())
            .write_value(7)
            .output(OutputFormat::Decimal)
            .pacing(Duration::ZERO)
            .build()
            .unwrap();
        let mut client = StubClient {
            reads: vec![Ok(vec![0x00, 0x03])].into(),
            ..Default::default()
        };

        let mut out = Vec::new();
        let report = QuerySession::new(&config, &mut client).execute(&mut out).await.unwrap();

        let write = report.write.unwrap();
        assert!(!write.is_acknowledged());
        assert_eq!(write.attempts(), 1);
        assert_eq!(report.results.len(), 1);
        assert_eq!(String::from_utf8(out).unwrap(), "3 ");
    }

    #[tokio::test]
    async fn test_read_only_session_has_no_write_status() {
        let config = config("0x10", 1, OutputFormat::Hex);
        let mut client = StubClient {
            reads: vec![Ok(vec![0x00, 0x00])].into(),
            ..Default::default()
        };

        let mut out = Vec::new();
        let report = QuerySession::new(&config, &mut client).execute(&mut out).await.unwrap();

        assert!(report.write.is_none());
        assert!(report.finished_at >= report.started_at);
        assert_eq!(String::from_utf8(out).unwrap(), "0x0 ");
    }
}
