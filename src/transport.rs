//! # Modbus RTU Transport Layer
//!
//! This module owns the serial link to the field device. It turns
//! [`ModbusRequest`]s into RTU frames, sends them, collects the answer frame and
//! validates it before handing a [`ModbusResponse`] back to the client layer.
//!
//! ## RTU Frame Layout
//!
//! ```text
//! ┌──────────┬──────────┬──────────────────────┬──────────────┐
//! │ Slave ID │ Function │ Data                 │ CRC (LE)     │
//! │ 1 byte   │ 1 byte   │ N bytes              │ 2 bytes      │
//! └──────────┴──────────┴──────────────────────┴──────────────┘
//! ```
//!
//! - Line settings are fixed at 8 data bits, no parity, 1 stop bit
//! - A gap of 3.5 character times separates consecutive frames
//! - Every request/response exchange is bounded by a per-call timeout
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use modbus_query::transport::{RtuTransport, ModbusTransport};
//! use modbus_query::protocol::ModbusRequest;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = RtuTransport::new("/dev/ttyUSB0", 9600, Duration::from_secs(5))?;
//!
//!     let request = ModbusRequest::read_holding_registers(1, 0x100, 2);
//!     let response = transport.request(&request).await?;
//!     println!("Response: {:?}", response);
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use crc::{Crc, CRC_16_MODBUS};
use log::{debug, info};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse, ModbusFunction};
use crate::MAX_RTU_FRAME_SIZE;

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Format raw bytes as hex string for packet logging
fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log packet with direction
fn log_packet(direction: &str, data: &[u8], slave_id: u8) {
    info!("[MODBUS-RTU] {} slave:{} {}", direction, slave_id, format_hex_packet(data));
}

/// Transport layer abstraction for Modbus communication
///
/// The query engine never talks to a transport directly; it goes through a
/// [`crate::client::RegisterClient`], which builds requests and interprets
/// responses on top of any `ModbusTransport`.
///
/// ## Error Handling
///
/// `request` reports link failures as `ModbusError::Timeout` when the device
/// stayed silent for the whole per-call timeout, and as one of the other
/// transport/protocol variants for everything else.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    /// Send a Modbus request and wait for response
    ///
    /// Handles the complete request-response cycle: frame encoding,
    /// transmission, reception, CRC validation and exception detection.
    ///
    /// # Errors
    ///
    /// - `ModbusError::Timeout` - Request timed out
    /// - `ModbusError::Connection` - Port is not open
    /// - `ModbusError::Protocol` - Response from the wrong slave
    /// - `ModbusError::Exception` - Device returned a Modbus exception
    /// - `ModbusError::Frame` / `CrcMismatch` - Corrupted response frame
    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse>;

    /// Check if the transport connection is active
    fn is_connected(&self) -> bool;

    /// Close the transport connection
    ///
    /// After calling this method the transport must not be used again.
    async fn close(&mut self) -> ModbusResult<()>;

    /// Get communication statistics
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Modbus RTU transport implementation
pub struct RtuTransport {
    /// Serial port connection
    port: Option<tokio_serial::SerialStream>,
    /// Port name/path
    port_name: String,
    /// Baud rate
    baud_rate: u32,
    /// Timeout for a whole request/response exchange
    timeout: Duration,
    /// Minimum silent interval between frames (3.5 character times)
    frame_gap: Duration,
    /// Transport statistics
    stats: TransportStats,
    /// Log every frame sent and received
    packet_logging: bool,
}

impl RtuTransport {
    /// Open an RTU transport with 8N1 line settings
    pub fn new(port: &str, baud_rate: u32, timeout: Duration) -> ModbusResult<Self> {
        Self::new_with_packet_logging(port, baud_rate, timeout, false)
    }

    /// Open an RTU transport, optionally logging raw frames
    pub fn new_with_packet_logging(
        port: &str,
        baud_rate: u32,
        timeout: Duration,
        enable_logging: bool,
    ) -> ModbusResult<Self> {
        if baud_rate == 0 {
            return Err(ModbusError::connection(format!(
                "Failed to open serial port {}: baud rate must be positive",
                port
            )));
        }

        let mut transport = Self {
            port: None,
            port_name: port.to_string(),
            baud_rate,
            timeout,
            frame_gap: Self::frame_gap_for(baud_rate),
            stats: TransportStats::default(),
            packet_logging: enable_logging,
        };

        transport.connect()?;
        Ok(transport)
    }

    /// Frame gap for a baud rate: 3.5 characters of 11 bits each
    fn frame_gap_for(baud_rate: u32) -> Duration {
        let char_time_us = (11_000_000 / baud_rate.max(1)) as u64;
        Duration::from_micros(char_time_us * 35 / 10)
    }

    /// Connect to the serial port
    fn connect(&mut self) -> ModbusResult<()> {
        let builder = tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(self.timeout);

        let port = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| ModbusError::connection(format!("Failed to open serial port {}: {}", self.port_name, e)))?;

        debug!("Opened {} at {} baud (8N1, timeout {:?})", self.port_name, self.baud_rate, self.timeout);
        self.port = Some(port);

        Ok(())
    }

    /// Calculate CRC for RTU frame
    fn calculate_crc(data: &[u8]) -> u16 {
        CRC_MODBUS.checksum(data)
    }

    /// Encode request to RTU frame
    fn encode_request(request: &ModbusRequest) -> Vec<u8> {
        let mut frame = Vec::with_capacity(8);

        frame.push(request.slave_id);
        frame.push(request.function.to_u8());
        frame.extend_from_slice(&request.address.to_be_bytes());

        match request.function {
            ModbusFunction::ReadHoldingRegisters => {
                frame.extend_from_slice(&request.quantity.to_be_bytes());
            },
            ModbusFunction::WriteSingleRegister => {
                frame.extend_from_slice(&request.data);
            },
        }

        // CRC is little-endian in RTU
        let crc = Self::calculate_crc(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        frame
    }

    /// Decode response from RTU frame
    fn decode_response(frame: &[u8]) -> ModbusResult<ModbusResponse> {
        if frame.len() < 4 {
            return Err(ModbusError::frame("RTU frame too short"));
        }

        let data_len = frame.len() - 2;
        let received_crc = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
        let calculated_crc = Self::calculate_crc(&frame[..data_len]);

        if received_crc != calculated_crc {
            return Err(ModbusError::crc_mismatch(calculated_crc, received_crc));
        }

        let slave_id = frame[0];
        let function_code = frame[1];

        if function_code & 0x80 != 0 {
            if frame.len() < 5 {
                return Err(ModbusError::frame("Invalid exception response"));
            }

            return Ok(ModbusResponse::new_exception(
                slave_id,
                ModbusFunction::from_u8(function_code & 0x7F)?,
                frame[2],
            ));
        }

        let function = ModbusFunction::from_u8(function_code)?;
        Ok(ModbusResponse::new_success(slave_id, function, frame[2..data_len].to_vec()))
    }

    /// Wait for frame gap before sending next frame
    async fn wait_frame_gap(&self) {
        tokio::time::sleep(self.frame_gap).await;
    }

    /// Read RTU frame from serial port
    ///
    /// A frame ends at the first silent gap after at least one byte arrived.
    /// The caller bounds the whole read with the per-call timeout.
    async fn read_frame(&mut self) -> ModbusResult<Vec<u8>> {
        let frame_gap = self.frame_gap;
        let port = self.port.as_mut()
            .ok_or_else(|| ModbusError::connection("Serial port not connected"))?;

        let mut frame = Vec::new();
        let mut buffer = [0u8; 1];

        loop {
            match timeout(frame_gap, port.read_exact(&mut buffer)).await {
                Ok(Ok(_)) => {
                    frame.push(buffer[0]);
                    if frame.len() > MAX_RTU_FRAME_SIZE {
                        return Err(ModbusError::frame("RTU frame too large"));
                    }
                },
                Ok(Err(e)) => {
                    return Err(ModbusError::io(format!("Serial read error: {}", e)));
                },
                Err(_) => {
                    if !frame.is_empty() {
                        break;
                    }
                    // nothing yet, keep waiting
                }
            }
        }

        Ok(frame)
    }
}

#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn request(&mut self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        request.validate()?;

        if self.port.is_none() {
            self.connect()?;
        }

        self.wait_frame_gap().await;

        let frame = Self::encode_request(request);
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        if self.packet_logging {
            log_packet("send", &frame, request.slave_id);
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        let port = self.port.as_mut()
            .ok_or_else(|| ModbusError::connection("Serial port not connected"))?;

        match timeout(self.timeout, port.write_all(&frame)).await {
            Ok(Ok(_)) => {
                let _ = timeout(self.timeout, port.flush()).await;
            },
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(ModbusError::io(format!("Failed to send RTU frame: {}", e)));
            },
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                return Err(ModbusError::timeout("send request", timeout_ms));
            }
        }

        let response_frame = match timeout(self.timeout, self.read_frame()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(e);
            },
            Err(_) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                return Err(ModbusError::timeout(format!("{}", request.function), timeout_ms));
            }
        };

        self.stats.responses_received += 1;
        self.stats.bytes_received += response_frame.len() as u64;

        if self.packet_logging {
            log_packet("receive", &response_frame, request.slave_id);
        }

        let response = match Self::decode_response(&response_frame) {
            Ok(response) => response,
            Err(e) => {
                self.stats.errors += 1;
                return Err(e);
            }
        };

        if response.slave_id != request.slave_id {
            self.stats.errors += 1;
            return Err(ModbusError::protocol(format!(
                "Response slave ID mismatch: expected {}, got {}",
                request.slave_id, response.slave_id
            )));
        }

        if response.function != request.function {
            self.stats.errors += 1;
            return Err(ModbusError::protocol(format!(
                "Response function mismatch: expected {}, got {}",
                request.function, response.function
            )));
        }

        if let Some(error) = response.get_exception() {
            self.stats.errors += 1;
            return Err(error);
        }

        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(_port) = self.port.take() {
            // SerialStream closes the descriptor on drop
            debug!("Closed serial port {}", self.port_name);
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
