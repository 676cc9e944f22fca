
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::error::{Error, Result};

// Fixed English names so the process locale can never leak into a Date
// header.
const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Formats an IMF fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format(time: DateTime<Utc>) -> String {
    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        DAYS[time.weekday().num_days_from_sunday() as usize],
        time.day(),
        MONTHS[time.month0() as usize],
        time.year(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// The current time as an IMF fixdate.
pub fn now() -> String {
    format(Utc::now())
}

fn name_index(table: &[&str], input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    table.iter().position(|name| {
        bytes.len() >= 3 && name.as_bytes().eq_ignore_ascii_case(&bytes[..3])
    })
}

fn day_index(input: &str) -> Option<usize> {
    name_index(&DAYS, input)
}

fn month_index(input: &str) -> Option<usize> {
    name_index(&MONTHS, input)
}

fn parse_number(input: &str, digits: usize) -> Result<u32> {
    if input.len() < digits || !input.as_bytes()[..digits].iter().all(u8::is_ascii_digit) {
        return Err(Error::ErrInvalidDate);
    }
    input[..digits].parse().map_err(|_| Error::ErrInvalidDate)
}

/// Parses an IMF fixdate. Day and month names are matched against the
/// fixed English tables, never the locale.
pub fn parse(input: &str) -> Result<DateTime<Utc>> {
    // Sun, 06 Nov 1994 08:49:37 GMT
    let input = input.trim_start();

    day_index(input).ok_or(Error::ErrInvalidDate)?;

    let rest = input
        .split_once(',')
        .map(|(_, rest)| rest.trim_start())
        .ok_or(Error::ErrInvalidDate)?;

    let day = parse_number(rest, 2)?;
    let rest = rest[2..].strip_prefix(' ').ok_or(Error::ErrInvalidDate)?;

    let month = month_index(rest).ok_or(Error::ErrInvalidDate)? as u32 + 1;
    let rest = rest[3..].strip_prefix(' ').ok_or(Error::ErrInvalidDate)?;

    let year = parse_number(rest, 4)?;
    let rest = rest[4..].strip_prefix(' ').ok_or(Error::ErrInvalidDate)?;

    let hour = parse_number(rest, 2)?;
    let rest = rest[2..].strip_prefix(':').ok_or(Error::ErrInvalidDate)?;

    let minute = parse_number(rest, 2)?;
    let rest = rest[2..].strip_prefix(':').ok_or(Error::ErrInvalidDate)?;

    let second = parse_number(rest, 2)?;
    let rest = rest[2..].strip_prefix(' ').ok_or(Error::ErrInvalidDate)?;

    if !rest.starts_with("GMT") {
        return Err(Error::ErrInvalidDate);
    }

    Utc.with_ymd_and_hms(year as i32, month, day, hour, minute, second)
        .single()
        .ok_or(Error::ErrInvalidDate)
}
