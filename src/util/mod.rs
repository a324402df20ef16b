//! Utility helpers shared across the stack: human-readable formatting for
//! BACnet dates, times, and byte buffers, plus the custom-enum macro used
//! by value sets with vendor-proprietary ranges.

pub mod enum_macros;

#[cfg(not(feature = "std"))]
use alloc::{format, string::String};

use crate::encoding::{Date, Time, DATE_TIME_UNSPECIFIED};

/// Render a BACnet date for logs, with `*` for unspecified fields and the
/// odd/even/last patterns spelled out.
pub fn date_to_string(date: &Date) -> String {
    let year = match date.year() {
        Some(year) => format!("{}", year),
        None => String::from("*"),
    };
    let month = match date.month {
        13 => String::from("odd"),
        14 => String::from("even"),
        DATE_TIME_UNSPECIFIED => String::from("*"),
        m => format!("{}", m),
    };
    let day = match date.day {
        32 => String::from("last"),
        33 => String::from("odd"),
        34 => String::from("even"),
        DATE_TIME_UNSPECIFIED => String::from("*"),
        d => format!("{}", d),
    };
    let weekday = match date.weekday {
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        6 => "Sat",
        7 => "Sun",
        DATE_TIME_UNSPECIFIED => "*",
        _ => "?",
    };
    format!("{}/{}/{} ({})", year, month, day, weekday)
}

/// Render a BACnet time for logs, with `*` for unspecified fields.
pub fn time_to_string(time: &Time) -> String {
    let field = |v: u8| {
        if v == DATE_TIME_UNSPECIFIED {
            String::from("*")
        } else {
            format!("{:02}", v)
        }
    };
    format!(
        "{}:{}:{}.{}",
        field(time.hour),
        field(time.minute),
        field(time.second),
        field(time.hundredths)
    )
}

/// Hex-dump a buffer one 16-octet row at a time, each row prefixed.
pub fn hex_dump(data: &[u8], prefix: &str) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        out.push_str(prefix);
        out.push_str(&format!("{:04X}: ", row * 16));
        out.push_str(&hex::encode(chunk));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Date, Time};

    #[test]
    fn date_formatting() {
        let date = Date::from_ymd(2026, 8, 1, 6).unwrap();
        assert_eq!(date_to_string(&date), "2026/8/1 (Sat)");
        assert_eq!(date_to_string(&Date::ANY), "*/*/* (*)");
        let pattern = Date {
            year: DATE_TIME_UNSPECIFIED,
            month: 13,
            day: 32,
            weekday: DATE_TIME_UNSPECIFIED,
        };
        assert_eq!(date_to_string(&pattern), "*/odd/last (*)");
    }

    #[test]
    fn time_formatting() {
        let time = Time::from_hms(8, 5, 0, 42).unwrap();
        assert_eq!(time_to_string(&time), "08:05:00.42");
        assert_eq!(time_to_string(&Time::ANY), "*:*:*.*");
    }

    #[test]
    fn hex_dump_rows() {
        let data: [u8; 18] = core::array::from_fn(|i| i as u8);
        let dump = hex_dump(&data, "  ");
        let mut lines = dump.lines();
        assert_eq!(
            lines.next().unwrap(),
            "  0000: 000102030405060708090a0b0c0d0e0f"
        );
        assert_eq!(lines.next().unwrap(), "  0010: 1011");
        assert!(lines.next().is_none());
    }
}
