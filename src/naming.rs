//! Stored-file naming: `<local time> <checksum> <client filename>`.

use chrono::{DateTime, FixedOffset, Local};
use std::borrow::Cow;

use crate::checksum::Checksum;

/// Sorts lexicographically by day, then time of day.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H.%M.%S %z";

/// Source of the wall-clock time embedded in stored names.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

#[cfg(test)]
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<FixedOffset>);

#[cfg(test)]
impl FixedClock {
    /// `2024-01-01 00.00.00 +0000`
    pub fn new_year_2024() -> Self {
        let time = DateTime::parse_from_rfc3339("2024-01-01T00:00:00+00:00")
            .expect("valid timestamp");
        Self(time)
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

pub fn format_timestamp(time: &DateTime<FixedOffset>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Builds the name a part is stored under inside the output directory.
pub fn output_file_name(
    time: &DateTime<FixedOffset>,
    checksum: &Checksum,
    original_name: &str,
) -> String {
    format!(
        "{} {} {}",
        format_timestamp(time),
        checksum,
        sanitize_file_name(original_name)
    )
}

/// Keeps the stored name a single path component: separators and NUL become `_`.
pub fn sanitize_file_name(name: &str) -> Cow<'_, str> {
    if name.contains(is_forbidden) {
        Cow::Owned(name.replace(is_forbidden, "_"))
    } else {
        Cow::Borrowed(name)
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '/' | '\\' | '\0')
}
