/// Modbus protocol definitions and data structures
///
/// Only the two function codes the query tool issues are modelled: read
/// holding registers (0x03) and write single register (0x06).

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus value type (16-bit register value)
pub type ModbusValue = u16;

/// Modbus slave/unit identifier, sent as given
pub type SlaveId = u8;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus request structure
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    /// Create a read holding registers request
    pub fn read_holding_registers(slave_id: SlaveId, address: ModbusAddress, quantity: u16) -> Self {
        Self {
            slave_id,
            function: ModbusFunction::ReadHoldingRegisters,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    /// Create a write single register request
    pub fn write_single_register(slave_id: SlaveId, address: ModbusAddress, value: ModbusValue) -> Self {
        Self {
            slave_id,
            function: ModbusFunction::WriteSingleRegister,
            address,
            quantity: 1,
            data: value.to_be_bytes().to_vec(),
        }
    }

    /// Validate the request
    pub fn validate(&self) -> ModbusResult<()> {
        match self.function {
            ModbusFunction::ReadHoldingRegisters => {
                if self.quantity == 0 {
                    return Err(ModbusError::invalid_data("Quantity cannot be zero".to_string()));
                }
                if self.quantity > crate::MAX_REGISTERS_PER_REQUEST {
                    return Err(ModbusError::invalid_data(
                        format!("Too many registers requested: {}", self.quantity)
                    ));
                }
            },
            ModbusFunction::WriteSingleRegister => {
                if self.data.len() != 2 {
                    return Err(ModbusError::invalid_data(
                        format!("Write single register needs 2 data bytes, got {}", self.data.len())
                    ));
                }
            },
        }

        Ok(())
    }
}

/// Modbus response structure
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
    pub exception: Option<u8>,
}

impl ModbusResponse {
    /// Create a successful response
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
            exception: None,
        }
    }

    /// Create an exception response
    pub fn new_exception(slave_id: SlaveId, function: ModbusFunction, exception_code: u8) -> Self {
        Self {
            slave_id,
            function,
            data: Vec::new(),
            exception: Some(exception_code),
        }
    }

    /// Check if this is an exception response
    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Get exception error if present
    pub fn get_exception(&self) -> Option<ModbusError> {
        self.exception
            .map(|code| ModbusError::exception(self.function.to_u8(), code))
    }

    /// Register payload of a read holding registers response
    ///
    /// Strips the leading byte count and checks that it matches both the
    /// frame length and the number of registers requested.
    pub fn register_bytes(&self, quantity: u16) -> ModbusResult<&[u8]> {
        if let Some(error) = self.get_exception() {
            return Err(error);
        }

        let (&byte_count, payload) = self.data
            .split_first()
            .ok_or_else(|| ModbusError::frame("Empty response data"))?;
        let byte_count = byte_count as usize;

        if payload.len() != byte_count {
            return Err(ModbusError::frame(format!(
                "Byte count {} does not match payload length {}",
                byte_count,
                payload.len()
            )));
        }

        if byte_count != quantity as usize * 2 {
            return Err(ModbusError::protocol(format!(
                "Expected {} register bytes, got {}",
                quantity as usize * 2,
                byte_count
            )));
        }

        Ok(payload)
    }

    /// Check that a write single register response echoes the request
    pub fn check_write_echo(&self, address: ModbusAddress, value: ModbusValue) -> ModbusResult<()> {
        if let Some(error) = self.get_exception() {
            return Err(error);
        }

        if self.data.len() != 4 {
            return Err(ModbusError::frame(format!(
                "Write response must carry 4 bytes, got {}",
                self.data.len()
            )));
        }

        let echoed_address = u16::from_be_bytes([self.data[0], self.data[1]]);
        let echoed_value = u16::from_be_bytes([self.data[2], self.data[3]]);
        if echoed_address != address || echoed_value != value {
            return Err(ModbusError::protocol(format!(
                "Write echo mismatch: sent {}={:#06x}, device answered {}={:#06x}",
                address, value, echoed_address, echoed_value
            )));
        }

        Ok(())
    }
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Decode `count` big-endian words from the front of a payload
    ///
    /// Trailing bytes beyond `count` words are ignored; a payload shorter than
    /// `2 * count` bytes is an error.
    pub fn bytes_to_registers(bytes: &[u8], count: u16) -> ModbusResult<Vec<u16>> {
        let needed = count as usize * 2;
        if bytes.len() < needed {
            return Err(ModbusError::invalid_data(format!(
                "Need {} bytes for {} registers, got {}",
                needed,
                count,
                bytes.len()
            )));
        }

        Ok(bytes[..needed]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(ModbusFunction::from_u8(0x03).unwrap(), ModbusFunction::ReadHoldingRegisters);
        assert_eq!(ModbusFunction::WriteSingleRegister.to_u8(), 0x06);

        assert!(ModbusFunction::from_u8(0x01).is_err());
        assert!(ModbusFunction::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_request_validation() {
        let valid_request = ModbusRequest::read_holding_registers(1, 100, 10);
        assert!(valid_request.validate().is_ok());

        let too_many_registers = ModbusRequest::read_holding_registers(1, 100, 200);
        assert!(too_many_registers.validate().is_err());

        let write = ModbusRequest::write_single_register(1, 0x100, 0xBEEF);
        assert_eq!(write.data, vec![0xBE, 0xEF]);
        assert!(write.validate().is_ok());
    }

    #[test]
    fn test_any_slave_id_is_sent() {
        for slave_id in [0u8, 248, 255] {
            let read = ModbusRequest::read_holding_registers(slave_id, 0x100, 1);
            assert!(read.validate().is_ok(), "slave {}", slave_id);

            let write = ModbusRequest::write_single_register(slave_id, 0x100, 1);
            assert!(write.validate().is_ok(), "slave {}", slave_id);
        }
    }

    #[test]
    fn test_register_bytes() {
        let response = ModbusResponse::new_success(
            1,
            ModbusFunction::ReadHoldingRegisters,
            vec![4, 0x12, 0x34, 0x56, 0x78],
        );
        assert_eq!(response.register_bytes(2).unwrap(), &[0x12, 0x34, 0x56, 0x78]);
        assert!(response.register_bytes(1).is_err());

        let truncated = ModbusResponse::new_success(
            1,
            ModbusFunction::ReadHoldingRegisters,
            vec![4, 0x12, 0x34],
        );
        assert!(matches!(truncated.register_bytes(2), Err(ModbusError::Frame { .. })));

        let exception = ModbusResponse::new_exception(1, ModbusFunction::ReadHoldingRegisters, 0x02);
        assert!(matches!(
            exception.register_bytes(1),
            Err(ModbusError::Exception { function: 0x03, code: 0x02, .. })
        ));
    }

    #[test]
    fn test_write_echo() {
        let response = ModbusResponse::new_success(
            1,
            ModbusFunction::WriteSingleRegister,
            vec![0x01, 0x00, 0x00, 0x2A],
        );
        assert!(response.check_write_echo(0x100, 42).is_ok());
        assert!(response.check_write_echo(0x100, 43).is_err());
        assert!(response.check_write_echo(0x101, 42).is_err());
    }

    #[test]
    fn test_data_utils() {
        let registers = vec![0x1234, 0x5678];
        let bytes = data_utils::registers_to_bytes(&registers);
        assert_eq!(bytes, vec![0x12, 0x34, 0x56, 0x78]);

        assert_eq!(data_utils::bytes_to_registers(&bytes, 1).unwrap(), vec![0x1234]);
        assert!(data_utils::bytes_to_registers(&bytes, 3).is_err());
    }
}
