//! Serde support for human-readable durations in the YAML config.
//!
//! Accepts strings like `"10s"`, `"500ms"`, `"1h30m"`, `"48h"` as well as a
//! bare number of seconds.

use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::Deserialize;

/// Parse a duration string made of `<number><unit>` segments.
///
/// Supported units: `ms`, `s`, `m`, `h`. A bare number is seconds.
pub fn parse(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();
    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() || *c == '.' {
                number.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration number in {input:?}"))?;
        let unit_ms = match unit.as_str() {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            other => return Err(format!("invalid duration unit {other:?} in {input:?}")),
        };
        total += Duration::from_millis((value * unit_ms) as u64);
    }
    Ok(total)
}

/// Render a duration back into the shortest string form.
pub fn format(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    if ms % 3_600_000 == 0 {
        return format!("{}h", ms / 3_600_000);
    }
    if ms % 60_000 == 0 {
        return format!("{}m", ms / 60_000);
    }
    if ms % 1_000 == 0 {
        return format!("{}s", ms / 1_000);
    }
    format!("{ms}ms")
}

pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(*d))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(de::Error::custom)
}

/// Serde adapter for `Option<Duration>` fields.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        d: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => serializer.serialize_some(&super::format(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(s) => super::parse(&s).map(Some).map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}
