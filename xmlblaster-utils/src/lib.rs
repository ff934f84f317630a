//! Utilities shared by the xmlBlaster crates
//!
//! ## Core Features:
//! - **Unique timestamps**: [`Timestamp`] is a nanosecond clock value that is strictly
//!   increasing inside the process, usable as a unique id (receive timestamps, queue entries)
//! - **Property values**: [`to_millis`] and [`to_bytes`] accept plain numbers as well as
//!   human readable units, the way configuration properties are written
//!
//! ## Usage Examples:
//! ```rust
//! use xmlblaster_utils::{to_bytes, to_millis, Timestamp};
//!
//! assert_eq!(to_millis("1h30m15s"), Some(5_415_000));
//! assert_eq!(to_millis("5000"), Some(5000));
//! assert_eq!(to_millis("0s"), Some(0));
//! assert_eq!(to_bytes("2M"), Some(2_097_152));
//!
//! let t1 = Timestamp::now();
//! let t2 = Timestamp::now();
//! assert!(t2 > t1);
//! ```

#![deny(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

/// Cluster node identifier, for example `heron`
pub type NodeId = String;

/// Timestamp representation in milliseconds since Unix epoch
pub type TimestampMillis = i64;

const BYTESIZE_K: u64 = 1024;
const BYTESIZE_M: u64 = 1048576;
const BYTESIZE_G: u64 = 1073741824;

static LAST_NANOS: AtomicI64 = AtomicI64::new(0);

/// Nanoseconds since Unix epoch, unique within the process
///
/// Two calls to [`Timestamp::now`] never return the same value, so a timestamp can
/// double as the identity of a message or queue entry.
///
/// # Example:
/// ```
/// use xmlblaster_utils::Timestamp;
///
/// let ts = Timestamp::from_nanos(1_500_000_000);
/// assert_eq!(ts.millis(), 1500);
/// assert_eq!(ts.to_string(), "1500000000");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    #[inline]
    pub fn now() -> Self {
        let now = timestamp_nanos();
        let mut last = LAST_NANOS.load(Ordering::Relaxed);
        loop {
            let next = if now > last { now } else { last + 1 };
            match LAST_NANOS.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
                Ok(_) => return Timestamp(next),
                Err(actual) => last = actual,
            }
        }
    }

    #[inline]
    pub fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    #[inline]
    pub fn from_millis(millis: TimestampMillis) -> Self {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    #[inline]
    pub fn nanos(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn millis(&self) -> TimestampMillis {
        self.0 / 1_000_000
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Timestamp(s.trim().parse::<i64>()?))
    }
}

const DURATION_UNITS: &[(&str, u64)] =
    &[("ms", 1), ("s", 1000), ("m", 60_000), ("h", 3_600_000), ("d", 86_400_000), ("w", 604_800_000)];

const BYTESIZE_UNITS: &[(&str, u64)] = &[
    ("b", 1),
    ("k", BYTESIZE_K),
    ("kb", BYTESIZE_K),
    ("m", BYTESIZE_M),
    ("mb", BYTESIZE_M),
    ("g", BYTESIZE_G),
    ("gb", BYTESIZE_G),
];

/// Sums `<number><unit>` segments such as `1h30m`. `None` if a segment is malformed,
/// the unit is unknown or the sum overflows.
fn sum_units(text: &str, units: &[(&str, u64)]) -> Option<u64> {
    let text = text.trim().to_ascii_lowercase();
    if text.is_empty() {
        return None;
    }
    let mut rest = text.as_str();
    let mut total = 0u64;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let v = rest[..digits].parse::<u64>().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        let factor = units.iter().find(|(u, _)| *u == unit).map(|(_, f)| *f)?;
        total = total.checked_add(v.checked_mul(factor)?)?;
    }
    Some(total)
}

/// Milliseconds from a property value: a plain (possibly negative) integer or a duration
/// string such as `10s`. Returns `None` if the value is malformed.
#[inline]
pub fn to_millis(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    sum_units(text, DURATION_UNITS).and_then(|v| i64::try_from(v).ok())
}

/// Bytes from a property value: a plain integer or a size string such as `2M`.
#[inline]
pub fn to_bytes(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    sum_units(text, BYTESIZE_UNITS).and_then(|v| i64::try_from(v).ok())
}

/// Current time in nanoseconds since Unix epoch
#[inline]
pub fn timestamp_nanos() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|t| t.as_nanos() as i64).unwrap_or_else(|_| {
        let now = chrono::Local::now();
        now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_millis().saturating_mul(1_000_000))
    })
}

/// Get current timestamp in milliseconds
///
/// # Example:
/// ```
/// let ts = xmlblaster_utils::timestamp_millis();
/// assert!(ts > 0);
/// ```
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_unique() {
        let mut last = Timestamp::now();
        for _ in 0..1000 {
            let t = Timestamp::now();
            assert!(t > last);
            last = t;
        }
    }

    #[test]
    fn test_property_values() {
        assert_eq!(to_millis("-1"), Some(-1));
        assert_eq!(to_millis(" 250 "), Some(250));
        assert_eq!(to_millis("1m"), Some(60_000));
        assert_eq!(to_millis("abc"), None);

        assert_eq!(to_bytes("10485760"), Some(10_485_760));
        assert_eq!(to_bytes("10M"), Some(10_485_760));
        assert_eq!(to_bytes("lots"), None);
    }

    #[test]
    fn test_zero_and_malformed_values() {
        assert_eq!(to_millis("0s"), Some(0));
        assert_eq!(to_millis("0"), Some(0));
        assert_eq!(to_millis("1s500ms"), Some(1500));
        assert_eq!(to_millis("5x"), None);
        assert_eq!(to_millis("s"), None);
        assert_eq!(to_millis("10s junk"), None);

        assert_eq!(to_bytes("0K"), Some(0));
        assert_eq!(to_bytes("1kb"), Some(1024));
        assert_eq!(to_bytes("2M512K"), Some(2_621_440));
        assert_eq!(to_bytes("3T"), None);
        assert_eq!(to_bytes("99999999999999999999G"), None);
        assert_eq!(to_bytes("18446744073709551615G"), None);
        assert_eq!(to_millis("9223372036854775807w"), None);
    }

    #[test]
    fn test_timestamp_parse() {
        let ts: Timestamp = "1234567890123".parse().unwrap();
        assert_eq!(ts.nanos(), 1234567890123);
        assert_eq!(ts.millis(), 1234567);
        assert!("12x".parse::<Timestamp>().is_err());
    }
}
