//! Value codecs shared by the loader and the writer.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::event::Timestamp;
use crate::vparser::Property;

/// Decode an RFC 5545 TEXT value.
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(escaped @ (',' | ';' | '\\')) => out.push(escaped),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Encode an RFC 5545 TEXT value.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Read a DTSTART/DTEND/DTSTAMP style property as a Unix timestamp.
///
/// Accepted forms:
/// - raw integers (files written by older versions)
/// - `20240108T100000Z` (UTC)
/// - `20240108T100000` with a `TZID` parameter
/// - `20240108T100000` (floating, read as UTC)
/// - `20240108`, with or without `VALUE=DATE`
pub fn parse_timestamp(property: &Property) -> Result<Timestamp, String> {
    let value = property.value.trim();
    if value.is_empty() {
        return Err("empty date-time".to_string());
    }

    let is_date = property
        .parameters
        .get("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"));
    let all_digits = value
        .strip_prefix('-')
        .unwrap_or(value)
        .bytes()
        .all(|b| b.is_ascii_digit());

    if is_date || (all_digits && value.len() == 8) {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|e| format!("{value}: {e}"))?;
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .ok_or_else(|| format!("{value}: invalid date"));
    }

    if all_digits {
        return value.parse::<Timestamp>().map_err(|e| format!("{value}: {e}"));
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .map_err(|e| format!("{value}: {e}"))?;
        return Ok(naive.and_utc().timestamp());
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|e| format!("{value}: {e}"))?;

    let zone = property
        .parameters
        .get("TZID")
        .and_then(|tzid| tzid.trim().parse::<chrono_tz::Tz>().ok());
    match zone {
        Some(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp())
            .ok_or_else(|| format!("{value}: does not exist in {tz}")),
        None => Ok(naive.and_utc().timestamp()),
    }
}

/// Write a timestamp as an RFC 5545 UTC date-time.
pub fn format_timestamp(timestamp: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .format("%Y%m%dT%H%M%SZ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vparser::Parameters;

    fn prop(value: &str, params: &[(&str, &str)]) -> Property {
        Property {
            name: "DTSTART".into(),
            parameters: params.iter().copied().collect::<Parameters>(),
            value: value.into(),
        }
    }

    #[test]
    fn test_text_escaping_round_trip() {
        let text = "Call with Bob; about a, b\nand c\\d";
        let escaped = escape_text(text);
        assert_eq!(escaped, "Call with Bob\\; about a\\, b\\nand c\\\\d");
        assert_eq!(unescape_text(&escaped), text);
    }

    #[test]
    fn test_unknown_escape_is_kept() {
        assert_eq!(unescape_text("a\\xb\\"), "a\\xb\\");
        assert_eq!(unescape_text("line\\Nbreak"), "line\nbreak");
    }

    #[test]
    fn test_timestamp_forms() {
        assert_eq!(parse_timestamp(&prop("1600000000", &[])), Ok(1_600_000_000));
        assert_eq!(
            parse_timestamp(&prop("20200913T122640Z", &[])),
            Ok(1_600_000_000)
        );
        assert_eq!(
            parse_timestamp(&prop("20200913T122640", &[])),
            Ok(1_600_000_000)
        );
        assert_eq!(
            parse_timestamp(&prop("20200913T142640", &[("TZID", "Europe/Paris")])),
            Ok(1_600_000_000)
        );
        assert_eq!(
            parse_timestamp(&prop("20200913", &[("VALUE", "DATE")])),
            Ok(1_599_955_200)
        );
        assert_eq!(parse_timestamp(&prop("20200913", &[])), Ok(1_599_955_200));
    }

    #[test]
    fn test_legacy_integer_with_tzid() {
        assert_eq!(
            parse_timestamp(&prop("1600000000", &[("TZID", "America/Montreal")])),
            Ok(1_600_000_000)
        );
    }

    #[test]
    fn test_invalid_timestamps() {
        assert!(parse_timestamp(&prop("", &[])).is_err());
        assert!(parse_timestamp(&prop("yesterday", &[])).is_err());
        assert!(parse_timestamp(&prop("20201340T000000Z", &[])).is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_600_000_000), "20200913T122640Z");
        assert_eq!(format_timestamp(0), "19700101T000000Z");
    }
}
