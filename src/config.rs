//! CLI surface and runtime configuration (§6).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};
use crate::framing::{HeaderStyle, NapsTag};

/// Header-style selector (§4.1, §6): one of `ascii4`, `binary2`, `bcd2`,
/// `naps`. `naps` implies Binary-2 framing plus the 12-byte tag wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum HeaderStyleArg {
    Ascii4,
    Binary2,
    Bcd2,
    Naps,
}

/// Which NAPS tag to wrap frames with, when `--header-style naps` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum NapsTagArg {
    Atm,
    Pos,
}

/// `jiso`'s command-line surface (§6).
#[derive(Debug, Parser)]
#[command(name = "jiso", about = "ISO 8583 financial-message client and load generator")]
pub struct Cli {
    /// Host to connect to.
    #[arg(long)]
    pub host: String,

    /// Port to connect to.
    #[arg(long)]
    pub port: u16,

    /// Path to the message-spec JSON (§4.3).
    #[arg(long = "spec-file")]
    pub spec_file: PathBuf,

    /// Path to the transactions JSON (§3, §4.3).
    #[arg(long = "file")]
    pub transactions_file: PathBuf,

    /// Wire framing header style.
    #[arg(long = "header-style", value_enum, default_value = "ascii4")]
    pub header_style: HeaderStyleArg,

    /// NAPS tag to use when `--header-style naps` is set.
    #[arg(long = "naps-tag", value_enum, default_value = "atm")]
    pub naps_tag: NapsTagArg,

    /// Maximum reconnect attempts per `connect()` call.
    #[arg(long = "reconnect-attempts", default_value_t = 3)]
    pub reconnect_attempts: u32,

    /// Per-attempt TCP connect timeout.
    #[arg(long = "connect-timeout", value_parser = parse_duration, default_value = "5s")]
    pub connect_timeout: Duration,

    /// Whole-connect ceiling across every attempt and backoff sleep.
    #[arg(long = "total-connect-timeout", value_parser = parse_duration, default_value = "60s")]
    pub total_connect_timeout: Duration,

    /// Per-request response timeout.
    #[arg(long = "response-timeout", value_parser = parse_duration, default_value = "5s")]
    pub response_timeout: Duration,

    /// Log every sent/received frame as a hex dump (diagnostic aid beyond
    /// the framing/unpack-error hex dumps §7 always produces).
    #[arg(long)]
    pub hex: bool,

    /// Directory backing the STAN/RRN persistence files (§4.4). Defaults
    /// to `<tempdir>/jiso`.
    #[arg(long = "counters-dir")]
    pub counters_dir: Option<PathBuf>,

    /// Enables the optional audit log (§4.9) at this sled database path.
    #[arg(long = "db-path")]
    pub db_path: Option<PathBuf>,
}

/// Validated, ready-to-use configuration derived from [`Cli`] (§6, §7
/// `ConfigInvalid`).
pub struct Config {
    pub host: String,
    pub port: u16,
    pub spec_file: PathBuf,
    pub transactions_file: PathBuf,
    pub header_style: HeaderStyle,
    pub naps: Option<NapsTag>,
    pub reconnect_attempts: u32,
    pub connect_timeout: Duration,
    pub total_connect_timeout: Duration,
    pub response_timeout: Duration,
    pub hex: bool,
    pub counters_dir: PathBuf,
    pub db_path: Option<PathBuf>,
}

impl Cli {
    /// Validate and normalize the parsed CLI flags into a [`Config`].
    /// Fails with [`Error::ConfigInvalid`] on out-of-range timeouts or an
    /// unreachable reconnect budget — everything else is checked lazily
    /// when the named file is actually opened.
    pub fn into_config(self) -> Result<Config> {
        if self.port == 0 {
            return Err(Error::config_invalid("port must be nonzero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config_invalid("connect-timeout must be positive"));
        }
        if self.total_connect_timeout < self.connect_timeout {
            return Err(Error::config_invalid("total-connect-timeout must be >= connect-timeout"));
        }
        if self.response_timeout.is_zero() {
            return Err(Error::config_invalid("response-timeout must be positive"));
        }

        let (header_style, naps) = match self.header_style {
            HeaderStyleArg::Ascii4 => (HeaderStyle::Ascii4, None),
            HeaderStyleArg::Binary2 => (HeaderStyle::Binary2, None),
            HeaderStyleArg::Bcd2 => (HeaderStyle::Bcd2, None),
            HeaderStyleArg::Naps => (
                HeaderStyle::Binary2,
                Some(match self.naps_tag {
                    NapsTagArg::Atm => NapsTag::Atm,
                    NapsTagArg::Pos => NapsTag::Pos,
                }),
            ),
        };

        let counters_dir = self.counters_dir.unwrap_or_else(|| std::env::temp_dir().join("jiso"));

        Ok(Config {
            host: self.host,
            port: self.port,
            spec_file: self.spec_file,
            transactions_file: self.transactions_file,
            header_style,
            naps,
            reconnect_attempts: self.reconnect_attempts,
            connect_timeout: self.connect_timeout,
            total_connect_timeout: self.total_connect_timeout,
            response_timeout: self.response_timeout,
            hex: self.hex,
            counters_dir,
            db_path: self.db_path,
        })
    }
}

/// Parse a duration flag like `5s`, `500ms`, `1m` (a tiny suffix grammar;
/// `humantime`-shaped without the extra dependency).
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let split_at = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(|| format!("missing time unit in {s:?}"))?;
    let (digits, unit) = s.split_at(split_at);
    let value: u64 = digits.parse().map_err(|_| format!("invalid duration {s:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        other => Err(format!("unknown duration unit {other:?} in {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_suffixes() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn rejects_total_timeout_shorter_than_connect_timeout() {
        let cli = Cli {
            host: "localhost".into(),
            port: 8583,
            spec_file: "spec.json".into(),
            transactions_file: "tx.json".into(),
            header_style: HeaderStyleArg::Ascii4,
            naps_tag: NapsTagArg::Atm,
            reconnect_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            total_connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            hex: false,
            counters_dir: None,
            db_path: None,
        };
        assert!(matches!(cli.into_config(), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn naps_header_style_implies_binary2_framing() {
        let cli = Cli {
            host: "localhost".into(),
            port: 8583,
            spec_file: "spec.json".into(),
            transactions_file: "tx.json".into(),
            header_style: HeaderStyleArg::Naps,
            naps_tag: NapsTagArg::Pos,
            reconnect_attempts: 3,
            connect_timeout: Duration::from_secs(5),
            total_connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(5),
            hex: false,
            counters_dir: None,
            db_path: None,
        };
        let config = cli.into_config().unwrap();
        assert_eq!(config.header_style, HeaderStyle::Binary2);
        assert_eq!(config.naps, Some(NapsTag::Pos));
    }
}
