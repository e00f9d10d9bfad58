/// Register client used by the query engine
///
/// The engine only needs two operations from a device: read a run of holding
/// registers and write one holding register. `RegisterClient` is that seam.
/// `GenericModbusClient` builds the PDU for either call on top of any
/// [`ModbusTransport`], and `ModbusRtuClient` binds it to the serial link.
///
/// Tests and alternative links implement `RegisterClient` directly.

use async_trait::async_trait;
use log::debug;

use crate::config::QueryConfig;
use crate::error::ModbusResult;
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusAddress, ModbusRequest, ModbusResponse, ModbusValue, SlaveId};
use crate::transport::{ModbusTransport, RtuTransport, TransportStats};

/// Holding register access for one device
///
/// The slave id is bound when the client is created, so calls only carry the
/// register address.
#[async_trait]
pub trait RegisterClient: Send {
    /// Read holding registers (function code 0x03)
    ///
    /// Returns the raw big-endian register payload, two bytes per register.
    async fn read_holding_registers(&mut self, address: ModbusAddress, count: u16) -> ModbusResult<Vec<u8>>;

    /// Write single register (function code 0x06)
    ///
    /// Succeeds only when the device echoes the address and value back.
    async fn write_single_register(&mut self, address: ModbusAddress, value: ModbusValue) -> ModbusResult<()>;

    /// Close the underlying link
    async fn close(&mut self) -> ModbusResult<()>;

    /// Get transport statistics
    fn get_stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Register client that works with any transport
pub struct GenericModbusClient<T: ModbusTransport> {
    transport: T,
    slave_id: SlaveId,
    logger: Option<CallbackLogger>,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    /// Create a new client talking to `slave_id` over `transport`
    pub fn new(transport: T, slave_id: SlaveId) -> Self {
        Self {
            transport,
            slave_id,
            logger: None,
        }
    }

    /// Create a new client with request/response tracing
    pub fn with_logger(transport: T, slave_id: SlaveId, logger: CallbackLogger) -> Self {
        Self {
            transport,
            slave_id,
            logger: Some(logger),
        }
    }

    pub fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute a raw request
    pub async fn execute_request(&mut self, request: ModbusRequest) -> ModbusResult<ModbusResponse> {
        if let Some(ref logger) = self.logger {
            logger.log_request(
                request.slave_id,
                request.function.to_u8(),
                request.address,
                request.quantity,
                &request.data,
            );
        }

        let response = self.transport.request(&request).await?;

        if let Some(ref logger) = self.logger {
            logger.log_response(
                response.slave_id,
                response.function.to_u8(),
                &response.data,
            );
        }

        Ok(response)
    }
}

#[async_trait]
impl<T: ModbusTransport> RegisterClient for GenericModbusClient<T> {
    async fn read_holding_registers(&mut self, address: ModbusAddress, count: u16) -> ModbusResult<Vec<u8>> {
        let request = ModbusRequest::read_holding_registers(self.slave_id, address, count);
        let response = self.execute_request(request).await?;
        Ok(response.register_bytes(count)?.to_vec())
    }

    async fn write_single_register(&mut self, address: ModbusAddress, value: ModbusValue) -> ModbusResult<()> {
        let request = ModbusRequest::write_single_register(self.slave_id, address, value);
        let response = self.execute_request(request).await?;
        response.check_write_echo(address, value)
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

/// Modbus RTU client implementation using the generic client
pub struct ModbusRtuClient {
    inner: GenericModbusClient<RtuTransport>,
}

impl ModbusRtuClient {
    /// Open the link described by a query configuration
    ///
    /// With frame tracing enabled, raw frames are logged by the transport and
    /// each request/response is interpreted through the console logger.
    pub fn connect(config: &QueryConfig) -> ModbusResult<Self> {
        let transport = RtuTransport::new_with_packet_logging(
            config.port(),
            config.baud_rate(),
            config.timeout(),
            config.trace_frames(),
        )?;

        let inner = if config.trace_frames() {
            GenericModbusClient::with_logger(transport, config.device_id(), CallbackLogger::console())
        } else {
            GenericModbusClient::new(transport, config.device_id())
        };

        debug!("Connected to slave {} on {}", config.device_id(), config.port());
        Ok(Self { inner })
    }
}

#[async_trait]
impl RegisterClient for ModbusRtuClient {
    async fn read_holding_registers(&mut self, address: ModbusAddress, count: u16) -> ModbusResult<Vec<u8>> {
        self.inner.read_holding_registers(address, count).await
    }

    async fn write_single_register(&mut self, address: ModbusAddress, value: ModbusValue) -> ModbusResult<()> {
        self.inner.write_single_register(address, value).await
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.inner.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.inner.get_stats()
    }
}
