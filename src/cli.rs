/// Command line surface
///
/// Flags are accepted with one dash (`-port /dev/ttyUSB1`, `-write=true`) as
/// well as the usual two. [`normalize_args`] rewrites the single-dash form
/// before clap sees it.

use std::ffi::OsString;
use std::time::Duration;
use clap::{ArgAction, Parser};

use crate::address::{parse_address_spec, parse_value_literal};
use crate::config::{LockPolicy, QueryConfig, DEFAULT_BAUD_RATE, DEFAULT_DEVICE_ID, DEFAULT_PORT};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::parse_level_filter;
use crate::output::OutputFormat;
use crate::{DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_TIMEOUT_MS, LOCK_POLL_INTERVAL_MS};

/// Read (and optionally write) Modbus RTU holding registers
#[derive(Parser, Debug, Clone)]
#[command(name = "modbus-query", author, version, about, long_about = None)]
pub struct Cli {
    /// Serial device path
    #[arg(long, default_value = DEFAULT_PORT, env = "MODBUS_QUERY_PORT")]
    pub port: String,

    /// Modbus slave id
    #[arg(long, default_value_t = DEFAULT_DEVICE_ID, env = "MODBUS_QUERY_DEVICE")]
    pub device: u8,

    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, env = "MODBUS_QUERY_BAUD")]
    pub baud: u32,

    /// Comma separated addresses, hex (0x..) or decimal, `=8` keeps the low byte
    #[arg(long, default_value = "0x100")]
    pub address: String,

    /// Registers to read per address
    #[arg(long, default_value_t = 1)]
    pub count: u16,

    /// Attempts per address read, and for the write
    #[arg(long, default_value_t = 1, env = "MODBUS_QUERY_RETRIES")]
    pub retries: u32,

    /// hex, decimal, raw or structured
    #[arg(long = "output-as", default_value = "raw")]
    pub output_as: String,

    /// Write `-value` to the address before reading it
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    pub write: bool,

    /// Value to write, hex (0x..) or decimal
    #[arg(long, default_value = "")]
    pub value: String,

    /// Per request timeout in milliseconds
    #[arg(long = "timeout-ms", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Seconds to wait for the device lock, 0 waits forever
    #[arg(long = "lock-timeout", default_value_t = DEFAULT_LOCK_TIMEOUT_SECS)]
    pub lock_timeout: u64,

    /// Log every RTU frame sent and received
    #[arg(long = "trace-frames", action = ArgAction::SetTrue)]
    pub trace_frames: bool,

    /// error, warn, info, debug or trace (RUST_LOG takes precedence)
    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,
}

impl Cli {
    /// Build the session configuration
    ///
    /// Everything that can be wrong with the command line is reported here,
    /// before the device is touched.
    pub fn to_config(&self) -> ModbusResult<QueryConfig> {
        let output: OutputFormat = self.output_as.parse()?;
        let addresses = parse_address_spec(&self.address)?;

        let lock_policy = LockPolicy {
            poll_interval: Duration::from_millis(LOCK_POLL_INTERVAL_MS),
            max_wait: match self.lock_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };

        let mut builder = QueryConfig::builder()
            .port(self.port.as_str())
            .device_id(self.device)
            .baud_rate(self.baud)
            .addresses(addresses)
            .count(self.count)
            .retries(self.retries)
            .output(output)
            .timeout(Duration::from_millis(self.timeout_ms))
            .lock_policy(lock_policy)
            .trace_frames(self.trace_frames);

        if self.write {
            if self.value.is_empty() {
                return Err(ModbusError::configuration("Write mode needs a -value"));
            }
            builder = builder.write_value(parse_value_literal(&self.value)?);
        }

        builder.build()
    }

    /// Default log level requested on the command line
    pub fn level_filter(&self) -> ModbusResult<log::LevelFilter> {
        parse_level_filter(&self.log_level)
    }
}

/// Rewrite single-dash long flags (`-port`) to their double-dash form
///
/// Short clap flags such as `-h` and `-V` and anything after a bare `--` are
/// left alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(Into::into)
        .enumerate()
        .map(|(index, arg)| {
            if index == 0 || passthrough {
                return arg;
            }

            let Some(text) = arg.to_str() else {
                return arg;
            };

            if text == "--" {
                passthrough = true;
                return arg;
            }

            let is_single_dash_long = text.len() > 2
                && text.starts_with('-')
                && !text.starts_with("--")
                && text[1..].starts_with(|c: char| c.is_ascii_alphabetic());

            if is_single_dash_long {
                OsString::from(format!("-{}", text))
            } else {
                arg
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressToken;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["modbus-query"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(normalize_args(argv)).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.address, "0x100");
        assert!(!cli.write);

        let config = cli.to_config().unwrap();
        assert_eq!(config.addresses(), &[AddressToken::new(0x100, false)]);
        assert_eq!(config.output(), OutputFormat::Raw);
        assert_eq!(config.retries(), 1);
        assert_eq!(cli.level_filter().unwrap(), log::LevelFilter::Warn);
    }

    #[test]
    fn test_single_dash_flags() {
        let cli = parse(&[
            "-port", "/dev/ttyUSB1",
            "-device", "3",
            "-address", "0x10,0x20=8",
            "-retries", "3",
            "-output-as", "json",
        ]);

        let config = cli.to_config().unwrap();
        assert_eq!(config.port(), "/dev/ttyUSB1");
        assert_eq!(config.device_id(), 3);
        assert_eq!(config.retries(), 3);
        assert_eq!(config.output(), OutputFormat::Structured);
        assert_eq!(config.addresses()[1], AddressToken::new(0x20, true));
    }

    #[test]
    fn test_write_flag_spellings() {
        assert!(parse(&["-write", "-value", "5"]).write);
        assert!(parse(&["-write=true", "-value", "5"]).write);
        assert!(!parse(&["-write=false"]).write);
        assert!(parse(&["--write", "--value=0x2A"]).to_config().unwrap().is_write_mode());
    }

    #[test]
    fn test_write_needs_value() {
        let err = parse(&["-write"]).to_config().unwrap_err();
        assert!(matches!(err, ModbusError::Configuration { .. }));

        let err = parse(&["-write", "-value", "abc"]).to_config().unwrap_err();
        assert!(matches!(err, ModbusError::InvalidNumericLiteral { .. }));
    }

    #[test]
    fn test_write_with_many_addresses_is_rejected() {
        let err = parse(&["-write", "-value", "1", "-address", "1,2"])
            .to_config()
            .unwrap_err();
        assert!(matches!(err, ModbusError::Configuration { .. }));
    }

    #[test]
    fn test_bad_output_and_address() {
        assert!(matches!(
            parse(&["-output-as", "xml"]).to_config(),
            Err(ModbusError::InvalidOutputFormat { .. })
        ));
        assert!(matches!(
            parse(&["-address", "0x10000"]).to_config(),
            Err(ModbusError::InvalidAddressFormat { .. })
        ));
    }

    #[test]
    fn test_lock_timeout_zero_waits_forever() {
        let config = parse(&["-lock-timeout", "0"]).to_config().unwrap();
        assert_eq!(config.lock_policy().max_wait, None);

        let config = parse(&["-lock-timeout", "2"]).to_config().unwrap();
        assert_eq!(config.lock_policy().max_wait, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_normalize_leaves_short_flags_and_values() {
        let args = normalize_args(["prog", "-h", "-port", "-5", "--", "-value"]);
        assert_eq!(args, vec!["prog", "-h", "--port", "-5", "--", "-value"]);
    }
}
