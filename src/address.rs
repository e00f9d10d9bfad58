/// Address expression parsing
///
/// An address expression is a comma-separated list of register addresses,
/// each written in decimal or as `0x`-prefixed hex, optionally followed by
/// `=8` to keep only the low byte of every register read from it:
///
/// ```text
/// 0x100,0x101=8,300
/// ```
///
/// Parsing either yields every token in input order or fails as a whole;
/// the caller decides what to do with the error.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusAddress;

/// Suffix marking an 8-bit (low byte) register
const MASK_LOW8_SUFFIX: &str = "8";

/// One parsed segment of an address expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressToken {
    /// Register address (0-65535)
    pub address: ModbusAddress,
    /// Keep only the low 8 bits of each register word
    pub mask_low8: bool,
}

impl AddressToken {
    pub fn new(address: ModbusAddress, mask_low8: bool) -> Self {
        Self { address, mask_low8 }
    }

    /// Apply this token's bit width to a decoded register word
    pub fn apply_mask(&self, value: u16) -> u16 {
        if self.mask_low8 {
            value & 0x00FF
        } else {
            value
        }
    }
}

impl fmt::Display for AddressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mask_low8 {
            write!(f, "{:#06x}=8", self.address)
        } else {
            write!(f, "{:#06x}", self.address)
        }
    }
}

/// Parse a full address expression
///
/// Duplicates are kept: querying the same register twice is legal.
///
/// ```rust
/// use modbus_query::address::parse_address_spec;
///
/// let tokens = parse_address_spec("0x10,0x20=8,30").unwrap();
/// assert_eq!(tokens.len(), 3);
/// assert_eq!(tokens[1].address, 0x20);
/// assert!(tokens[1].mask_low8);
/// ```
pub fn parse_address_spec(spec: &str) -> ModbusResult<Vec<AddressToken>> {
    spec.split(',').map(parse_address_token).collect()
}

/// Parse one segment of an address expression
pub fn parse_address_token(segment: &str) -> ModbusResult<AddressToken> {
    let (number, mask_low8) = match segment.split_once('=') {
        Some((number, MASK_LOW8_SUFFIX)) => (number, true),
        Some((_, suffix)) => {
            return Err(ModbusError::invalid_address_format(
                segment,
                format!("unsupported width suffix '={}' (only '=8' is allowed)", suffix),
            ));
        }
        None => (segment, false),
    };

    let address = parse_u16_literal(number)
        .map_err(|reason| ModbusError::invalid_address_format(segment, reason))?;

    Ok(AddressToken::new(address, mask_low8))
}

/// Parse a register value literal (used for the write value)
///
/// Same number syntax as addresses, without the width suffix.
pub fn parse_value_literal(literal: &str) -> ModbusResult<u16> {
    parse_u16_literal(literal)
        .map_err(|reason| ModbusError::invalid_numeric_literal(literal, reason))
}

/// Parse a `0x` hex or plain decimal literal into 16 bits
///
/// Only digits of the selected radix are accepted, so signs, whitespace and
/// empty strings are rejected rather than silently tolerated.
fn parse_u16_literal(text: &str) -> Result<u16, String> {
    let (digits, radix, kind) = match text.strip_prefix("0x") {
        Some(hex) => (hex, 16, "hexadecimal"),
        None => (text, 10, "decimal"),
    };

    if digits.is_empty() {
        return Err(format!("empty {} number", kind));
    }

    if !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(format!("not a {} number", kind));
    }

    u16::from_str_radix(digits, radix)
        .map_err(|_| "value does not fit in 16 bits (max 65535)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_and_decimal() {
        assert_eq!(parse_address_token("0x100").unwrap(), AddressToken::new(256, false));
        assert_eq!(parse_address_token("256").unwrap(), AddressToken::new(256, false));
        assert_eq!(parse_address_token("0xffff").unwrap(), AddressToken::new(0xFFFF, false));
        assert_eq!(parse_address_token("0xABcd").unwrap(), AddressToken::new(0xABCD, false));
        assert_eq!(parse_address_token("0").unwrap(), AddressToken::new(0, false));
    }

    #[test]
    fn test_parse_mask_suffix() {
        assert_eq!(parse_address_token("256=8").unwrap(), AddressToken::new(256, true));
        assert_eq!(parse_address_token("0x10=8").unwrap(), AddressToken::new(16, true));
    }

    #[test]
    fn test_rejects_bad_suffix() {
        for segment in ["256=16", "256=", "256=8=8", "=8"] {
            assert!(
                matches!(parse_address_token(segment), Err(ModbusError::InvalidAddressFormat { .. })),
                "{} should be rejected",
                segment
            );
        }
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        for segment in ["abc", "0x10000", "65536", "", "0x", "-1", "+5", " 5", "0X10", "1.5", "0xg1"] {
            assert!(
                matches!(parse_address_token(segment), Err(ModbusError::InvalidAddressFormat { .. })),
                "{:?} should be rejected",
                segment
            );
        }
    }

    #[test]
    fn test_spec_preserves_order_and_duplicates() {
        let tokens = parse_address_spec("0x10,0x20,30").unwrap();
        assert_eq!(
            tokens.iter().map(|t| t.address).collect::<Vec<_>>(),
            vec![0x10, 0x20, 30]
        );

        let tokens = parse_address_spec("5,5").unwrap();
        assert_eq!(tokens, vec![AddressToken::new(5, false), AddressToken::new(5, false)]);
    }

    #[test]
    fn test_spec_fails_as_a_whole() {
        let err = parse_address_spec("0x10,bogus,0x20").unwrap_err();
        match err {
            ModbusError::InvalidAddressFormat { token, .. } => assert_eq!(token, "bogus"),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(parse_address_spec("0x10,").is_err());
        assert!(parse_address_spec("").is_err());
    }

    #[test]
    fn test_mask_application() {
        assert_eq!(AddressToken::new(1, true).apply_mask(0x1234), 0x34);
        assert_eq!(AddressToken::new(1, false).apply_mask(0x1234), 0x1234);
    }

    #[test]
    fn test_value_literal() {
        assert_eq!(parse_value_literal("0x2A").unwrap(), 42);
        assert_eq!(parse_value_literal("42").unwrap(), 42);
        assert!(matches!(
            parse_value_literal(""),
            Err(ModbusError::InvalidNumericLiteral { .. })
        ));
        assert!(matches!(
            parse_value_literal("42=8"),
            Err(ModbusError::InvalidNumericLiteral { .. })
        ));
    }
}
