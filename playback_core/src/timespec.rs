//! Time specifications entered by users, and time formatting
//!
//! Accepted forms:
//!
//! - `+N` / `-N` with an optional `h`, `m` or `s` suffix: offset from the
//!   current playback time (`+90`, `-2.5m`, `+1H`)
//! - `HH:MM:SS[.sss]`, where either separator may also be `.`: time of day
//!   on the recording day (`13:05:09.25`, `13.05.09`)
//! - plain seconds since midnight of the recording day (`47109.25`)

use crate::error::{PlaybackError, PlaybackResult};
use chrono::{DateTime, Timelike};
use std::fmt;
use std::str::FromStr;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// A parsed time specification
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeSpec {
    /// Seconds since midnight of the recording day
    Absolute(f64),
    /// Seconds relative to the current playback time
    Relative(f64),
}

impl TimeSpec {
    /// Parse a user-entered specification
    pub fn parse(spec: &str) -> PlaybackResult<Self> {
        let spec = spec.trim();
        let invalid = || PlaybackError::InvalidTimeSpec(spec.to_string());

        if spec.starts_with('+') || spec.starts_with('-') {
            let (number, factor) = match spec.chars().last() {
                Some('h' | 'H') => (&spec[..spec.len() - 1], 3600.0),
                Some('m' | 'M') => (&spec[..spec.len() - 1], 60.0),
                Some('s' | 'S') => (&spec[..spec.len() - 1], 1.0),
                _ => (spec, 1.0),
            };
            let value = parse_finite(number).ok_or_else(invalid)?;
            return Ok(TimeSpec::Relative(value * factor));
        }

        let bytes = spec.as_bytes();
        let is_separator = |b: u8| b == b':' || b == b'.';
        if bytes.len() > 7 && spec.is_ascii() && is_separator(bytes[2]) && is_separator(bytes[5]) {
            let hours = parse_two_digits(&bytes[0..2]).ok_or_else(invalid)?;
            let minutes = parse_two_digits(&bytes[3..5]).ok_or_else(invalid)?;
            let seconds = parse_finite(&spec[6..]).ok_or_else(invalid)?;
            if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
                return Err(invalid());
            }
            return Ok(TimeSpec::Absolute(
                hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds,
            ));
        }

        parse_finite(spec).map(TimeSpec::Absolute).ok_or_else(invalid)
    }

    /// Resolve to recording time, given midnight of the recording day and
    /// the current playback time
    pub fn resolve(&self, midnight: f64, now: f64) -> f64 {
        match *self {
            TimeSpec::Absolute(seconds) => midnight + seconds,
            TimeSpec::Relative(offset) => now + offset,
        }
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, TimeSpec::Relative(_))
    }
}

impl FromStr for TimeSpec {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeSpec::parse(s)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TimeSpec::Absolute(seconds) => write!(f, "{}", format_duration_body(seconds)),
            TimeSpec::Relative(offset) if offset < 0.0 => write!(f, "{}s", offset),
            TimeSpec::Relative(offset) => write!(f, "+{}s", offset),
        }
    }
}

fn parse_finite(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_two_digits(bytes: &[u8]) -> Option<u32> {
    match bytes {
        [a, b] if a.is_ascii_digit() && b.is_ascii_digit() => {
            Some(u32::from(a - b'0') * 10 + u32::from(b - b'0'))
        }
        _ => None,
    }
}

/// Midnight (UTC) of the day holding `when`
pub fn midnight_of(when: f64) -> f64 {
    (when / SECONDS_PER_DAY).floor() * SECONDS_PER_DAY
}

/// UTC time of day as `HH:MM:SS.ss`
pub fn format_time_stamp(when: f64) -> String {
    let secs = when.floor();
    let centis = ((when - secs) * 100.0).floor() as u32;
    match DateTime::from_timestamp(secs as i64, 0) {
        Some(dt) => format!(
            "{:02}:{:02}:{:02}.{:02}",
            dt.hour(),
            dt.minute(),
            dt.second(),
            centis.min(99)
        ),
        None => format!("{:.2}", when),
    }
}

/// UTC date and time as `YYYY-MM-DD HH:MM:SS.ss`
pub fn format_date_time(when: f64) -> String {
    match DateTime::from_timestamp(when.floor() as i64, 0) {
        Some(dt) => format!("{} {}", dt.format("%Y-%m-%d"), format_time_stamp(when)),
        None => format!("{:.2}", when),
    }
}

/// Elapsed time as `+HH:MM:SS.ss`
pub fn format_duration(duration: f64) -> String {
    format!("+{}", format_duration_body(duration))
}

fn format_duration_body(duration: f64) -> String {
    let sign = if duration < 0.0 { "-" } else { "" };
    let total_centis = (duration.abs() * 100.0).floor() as u64;
    let centis = total_centis % 100;
    let total_secs = total_centis / 100;
    format!(
        "{}{:02}:{:02}:{:02}.{:02}",
        sign,
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        centis
    )
}
