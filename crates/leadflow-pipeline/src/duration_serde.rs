//! Serde helpers for `Duration` fields written as `"240s"`, `"2m"`, `"24h"`.

use serde::{self, Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let secs = duration.as_secs();
    let text = if duration.subsec_millis() != 0 {
        format!("{}ms", duration.as_millis())
    } else if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    };
    serializer.serialize_str(&text)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration_str(&s).map_err(serde::de::Error::custom)
}

pub(crate) fn parse_duration_str(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit_secs) = if let Some(val) = s.strip_suffix("ms") {
        let n: u64 = val.parse().map_err(|e| format!("invalid duration '{}': {}", s, e))?;
        return Ok(Duration::from_millis(n));
    } else if let Some(val) = s.strip_suffix('s') {
        (val, 1)
    } else if let Some(val) = s.strip_suffix('m') {
        (val, 60)
    } else if let Some(val) = s.strip_suffix('h') {
        (val, 3600)
    } else if let Some(val) = s.strip_suffix('d') {
        (val, 86400)
    } else {
        return Err(format!("unknown duration format: {}", s));
    };
    let n: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration '{}': {}", s, e))?;
    let secs = n
        .checked_mul(unit_secs)
        .ok_or_else(|| format!("duration out of range: {}", s))?;
    Ok(Duration::from_secs(secs))
}
