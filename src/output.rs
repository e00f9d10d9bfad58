/// Result aggregation and output formatting
///
/// Text formats (`raw`, `hex`, `decimal`) are written value by value while the
/// reader runs, so a slow or flaky device still shows partial progress. The
/// `structured` format stays silent during the session and prints a single
/// JSON document once every address has been attempted.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use log::error;
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusAddress;

/// How decoded register values are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// Big-endian bytes of each register, e.g. `[0x00, 0xff]`
    ///
    /// Rendered per word, not as a dump of the whole response payload: a
    /// read of `count` registers prints `count` byte pairs, and a `=8` mask
    /// shows up as a zero high byte.
    #[default]
    Raw,
    /// `0x`-prefixed lowercase hex, e.g. `0xff`
    Hex,
    /// Base 10, e.g. `255`
    Decimal,
    /// One JSON document at the end of the run
    Structured,
}

impl OutputFormat {
    /// Whether values are written while the read loop runs
    pub fn is_streaming(self) -> bool {
        !matches!(self, OutputFormat::Structured)
    }

    /// Render one register value for a streaming format
    ///
    /// Returns `None` for `Structured`, which prints nothing inline.
    pub fn format_value(self, value: u16) -> Option<String> {
        match self {
            OutputFormat::Raw => {
                let [high, low] = value.to_be_bytes();
                Some(format!("[{:#04x}, {:#04x}]", high, low))
            }
            OutputFormat::Hex => Some(format!("{:#x}", value)),
            OutputFormat::Decimal => Some(value.to_string()),
            OutputFormat::Structured => None,
        }
    }

    /// Write one value followed by a separating space
    pub fn write_value<W: Write>(self, out: &mut W, value: u16) -> ModbusResult<()> {
        if let Some(text) = self.format_value(value) {
            write!(out, "{} ", text)?;
        }
        Ok(())
    }
}

impl FromStr for OutputFormat {
    type Err = ModbusError;

    /// Accepts the format names plus the legacy spellings `go` and `json`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" | "go" => Ok(OutputFormat::Raw),
            "hex" => Ok(OutputFormat::Hex),
            "decimal" => Ok(OutputFormat::Decimal),
            "structured" | "json" => Ok(OutputFormat::Structured),
            other => Err(ModbusError::invalid_output_format(other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Raw => "raw",
            OutputFormat::Hex => "hex",
            OutputFormat::Decimal => "decimal",
            OutputFormat::Structured => "structured",
        };
        f.write_str(name)
    }
}

/// One successful read of an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOutcome {
    #[serde(rename = "Address")]
    pub address: ModbusAddress,
    /// Register values in read order, masked if the address asked for it
    #[serde(rename = "Values")]
    pub values: Vec<u16>,
}

/// Successful reads in query order
///
/// Addresses whose retry budget ran out never appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryResult {
    outcomes: Vec<ReadOutcome>,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: ReadOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &[ReadOutcome] {
        &self.outcomes
    }

    /// First outcome recorded for an address
    pub fn find(&self, address: ModbusAddress) -> Option<&ReadOutcome> {
        self.outcomes.iter().find(|outcome| outcome.address == address)
    }

    /// Serialize as `[{"Address":..,"Values":[..]}, ...]`
    pub fn to_json(&self) -> ModbusResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl IntoIterator for QueryResult {
    type Item = ReadOutcome;
    type IntoIter = std::vec::IntoIter<ReadOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

/// Finish the output once all addresses were attempted
///
/// Only the structured format has anything left to print. A serialization
/// failure is logged and nothing is written, so a partial document never
/// reaches stdout.
pub fn finish_output<W: Write>(format: OutputFormat, result: &QueryResult, out: &mut W) -> ModbusResult<()> {
    if format.is_streaming() {
        out.flush()?;
        return Ok(());
    }

    match result.to_json() {
        Ok(document) => {
            writeln!(out, "{}", document)?;
            out.flush()?;
        }
        Err(e) => error!("Structured output skipped: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QueryResult {
        let mut result = QueryResult::new();
        result.push(ReadOutcome { address: 16, values: vec![255] });
        result.push(ReadOutcome { address: 32, values: vec![1, 2] });
        result
    }

    #[test]
    fn test_format_names() {
        assert_eq!("raw".parse::<OutputFormat>().unwrap(), OutputFormat::Raw);
        assert_eq!("go".parse::<OutputFormat>().unwrap(), OutputFormat::Raw);
        assert_eq!("hex".parse::<OutputFormat>().unwrap(), OutputFormat::Hex);
        assert_eq!("decimal".parse::<OutputFormat>().unwrap(), OutputFormat::Decimal);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Structured);
        assert!(matches!(
            "xml".parse::<OutputFormat>(),
            Err(ModbusError::InvalidOutputFormat { .. })
        ));
        assert_eq!(OutputFormat::default(), OutputFormat::Raw);
    }

    #[test]
    fn test_value_rendering() {
        assert_eq!(OutputFormat::Hex.format_value(0xFF).unwrap(), "0xff");
        assert_eq!(OutputFormat::Hex.format_value(0).unwrap(), "0x0");
        assert_eq!(OutputFormat::Decimal.format_value(0x1234).unwrap(), "4660");
        assert_eq!(OutputFormat::Raw.format_value(0x00FF).unwrap(), "[0x00, 0xff]");
        assert_eq!(OutputFormat::Raw.format_value(0x1234).unwrap(), "[0x12, 0x34]");
        assert!(OutputFormat::Structured.format_value(1).is_none());
    }

    #[test]
    fn test_streaming_writes_space_separated() {
        let mut out = Vec::new();
        OutputFormat::Decimal.write_value(&mut out, 1).unwrap();
        OutputFormat::Decimal.write_value(&mut out, 2).unwrap();
        OutputFormat::Structured.write_value(&mut out, 3).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1 2 ");
    }

    #[test]
    fn test_structured_document() {
        assert_eq!(
            sample().to_json().unwrap(),
            r#"[{"Address":16,"Values":[255]},{"Address":32,"Values":[1,2]}]"#
        );
        assert_eq!(QueryResult::new().to_json().unwrap(), "[]");
    }

    #[test]
    fn test_finish_output() {
        let mut out = Vec::new();
        finish_output(OutputFormat::Structured, &sample(), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("]\n"));

        let mut out = Vec::new();
        finish_output(OutputFormat::Hex, &sample(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_find_first_outcome() {
        let result = sample();
        assert_eq!(result.find(32).unwrap().values, vec![1, 2]);
        assert!(result.find(48).is_none());
    }
}
