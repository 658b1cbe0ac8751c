use std::time::Duration;

use crate::{DfsError, DfsResult};

/// Parse a human duration flag value: `500ms`, `30s`, `5m`, `1h`, `2d`.
/// A bare number is taken as seconds.
pub fn parse_duration(value: &str) -> DfsResult<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DfsError::InvalidParam("empty duration".to_string()));
    }

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| DfsError::InvalidParam(format!("invalid duration '{}'", value)))?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        "d" => Ok(Duration::from_secs(amount * 86400)),
        other => Err(DfsError::InvalidParam(format!(
            "invalid duration unit '{}' in '{}'",
            other, value
        ))),
    }
}

/// Parse a `--log-level` flag value into a level filter.
pub fn parse_log_level(value: &str) -> DfsResult<log::LevelFilter> {
    match value.to_ascii_lowercase().as_str() {
        "off" => Ok(log::LevelFilter::Off),
        "error" => Ok(log::LevelFilter::Error),
        "warn" => Ok(log::LevelFilter::Warn),
        "info" => Ok(log::LevelFilter::Info),
        "debug" => Ok(log::LevelFilter::Debug),
        "trace" => Ok(log::LevelFilter::Trace),
        other => Err(DfsError::InvalidParam(format!(
            "invalid log level '{}'",
            other
        ))),
    }
}
