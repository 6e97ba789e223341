#![forbid(unsafe_code)]

//! Pure conversions from the encodings the Data API emits into the canonical
//! forms stored in the database.

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use thiserror::Error;

/// Canonical storage format for every timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Tags are stored as one delimiter-joined string. Embedded delimiters are not
/// escaped, so a tag containing a comma splits into two on the way back.
pub const TAG_DELIMITER: &str = ",";

const TIMESTAMP_INPUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%SZ"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("invalid duration `{0}`: expected PT[nH][nM][nS]")]
    InvalidDuration(String),
}

/// Outcome of a best-effort conversion. `Degraded` keeps the untouched input
/// so callers can tell a fallback apart from a real value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Normalized<T> {
    Canonical(T),
    Degraded(String),
}

impl<T> Normalized<T> {
    pub fn canonical(&self) -> Option<&T> {
        match self {
            Normalized::Canonical(value) => Some(value),
            Normalized::Degraded(_) => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Normalized::Degraded(_))
    }
}

impl Normalized<NaiveDateTime> {
    /// Column value for this timestamp. Degraded inputs become `NULL`.
    pub fn to_storage(&self) -> Option<String> {
        self.canonical()
            .map(|timestamp| timestamp.format(TIMESTAMP_FORMAT).to_string())
    }
}

/// Parses the two UTC encodings the API uses (`...T12:00:00Z` and
/// `...T12:00:00.123Z`). Fractional seconds are dropped so both encodings of
/// the same second compare equal. Anything else comes back as `Degraded`.
pub fn parse_timestamp(text: &str) -> Normalized<NaiveDateTime> {
    let trimmed = text.trim();
    for format in TIMESTAMP_INPUTS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Normalized::Canonical(parsed.with_nanosecond(0).unwrap_or(parsed));
        }
    }
    Normalized::Degraded(text.to_owned())
}

/// Converts `PT#H#M#S` (every component optional, fixed order) into a
/// zero-padded `HH:MM:SS` string.
pub fn parse_duration(text: &str) -> Result<String, NormalizeError> {
    let invalid = || NormalizeError::InvalidDuration(text.to_owned());
    let mut rest = text.trim().strip_prefix("PT").ok_or_else(invalid)?;

    // hours, minutes, seconds
    let mut parts = [0u64; 3];
    let mut next_slot = 0;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits_end == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits_end].parse().map_err(|_| invalid())?;
        let unit = rest[digits_end..].chars().next().ok_or_else(invalid)?;
        let slot = match unit {
            'H' => 0,
            'M' => 1,
            'S' => 2,
            _ => return Err(invalid()),
        };
        if slot < next_slot {
            return Err(invalid());
        }
        parts[slot] = value;
        next_slot = slot + 1;
        rest = &rest[digits_end + unit.len_utf8()..];
    }

    let [hours, minutes, seconds] = parts;
    Ok(format!("{hours:02}:{minutes:02}:{seconds:02}"))
}

pub fn join_tags(tags: &[String]) -> String {
    tags.join(TAG_DELIMITER)
}

pub fn split_tags(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(TAG_DELIMITER).map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hms_seconds(hms: &str) -> u64 {
        let mut fields = hms.rsplitn(3, ':');
        let seconds: u64 = fields.next().unwrap().parse().unwrap();
        let minutes: u64 = fields.next().unwrap().parse().unwrap();
        let hours: u64 = fields.next().unwrap().parse().unwrap();
        hours * 3600 + minutes * 60 + seconds
    }

    #[test]
    fn timestamps_with_and_without_fraction_agree() {
        let plain = parse_timestamp("2023-07-14T09:15:30Z");
        let fractional = parse_timestamp("2023-07-14T09:15:30.482Z");
        assert_eq!(plain, fractional);
        assert_eq!(plain.to_storage().as_deref(), Some("2023-07-14 09:15:30"));
    }

    #[test]
    fn timestamp_canonical_form_is_space_separated() {
        let parsed = parse_timestamp("2022-01-01T00:00:00.000000Z");
        assert_eq!(parsed.to_storage().as_deref(), Some("2022-01-01 00:00:00"));
        assert!(!parsed.is_degraded());
    }

    #[test]
    fn unparseable_timestamp_is_flagged_not_fatal() {
        let parsed = parse_timestamp("last tuesday");
        assert_eq!(parsed, Normalized::Degraded("last tuesday".to_owned()));
        assert!(parsed.is_degraded());
        assert!(parsed.to_storage().is_none());
    }

    #[test]
    fn timestamp_without_utc_marker_is_degraded() {
        assert!(parse_timestamp("2023-07-14T09:15:30").is_degraded());
        assert!(parse_timestamp("2023-07-14T09:15:30+02:00").is_degraded());
    }

    #[test]
    fn duration_pads_every_component() {
        assert_eq!(parse_duration("PT1H2M3S").unwrap(), "01:02:03");
        assert_eq!(parse_duration("PT4M13S").unwrap(), "00:04:13");
        assert_eq!(parse_duration("PT45S").unwrap(), "00:00:45");
        assert_eq!(parse_duration("PT2H").unwrap(), "02:00:00");
        assert_eq!(parse_duration("PT1H5S").unwrap(), "01:00:05");
        assert_eq!(parse_duration("PT").unwrap(), "00:00:00");
    }

    #[test]
    fn duration_total_matches_component_sum() {
        for hours in [None, Some(0u64), Some(1), Some(12), Some(130)] {
            for minutes in [None, Some(0u64), Some(7), Some(59)] {
                for seconds in [None, Some(0u64), Some(9), Some(59)] {
                    let mut text = String::from("PT");
                    if let Some(h) = hours {
                        text.push_str(&format!("{h}H"));
                    }
                    if let Some(m) = minutes {
                        text.push_str(&format!("{m}M"));
                    }
                    if let Some(s) = seconds {
                        text.push_str(&format!("{s}S"));
                    }
                    let expected = hours.unwrap_or(0) * 3600
                        + minutes.unwrap_or(0) * 60
                        + seconds.unwrap_or(0);
                    let parsed = parse_duration(&text).unwrap();
                    assert_eq!(hms_seconds(&parsed), expected, "input {text}");
                }
            }
        }
    }

    #[test]
    fn duration_rejects_malformed_input() {
        for input in ["", "1H2M", "P1DT2H", "PT5", "PTH", "PT3S2M", "PT1M1M", "PT1X", "PT1H2M3Sx"] {
            assert_eq!(
                parse_duration(input),
                Err(NormalizeError::InvalidDuration(input.to_owned())),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn tags_join_and_split() {
        let tags = vec!["rust".to_owned(), "systems".to_owned(), "talks".to_owned()];
        let joined = join_tags(&tags);
        assert_eq!(joined, "rust,systems,talks");
        assert_eq!(split_tags(&joined), tags);
        assert!(split_tags("").is_empty());
        assert_eq!(join_tags(&[]), "");
    }

    #[test]
    fn embedded_delimiter_is_not_escaped() {
        let tags = vec!["hello, world".to_owned()];
        assert_eq!(split_tags(&join_tags(&tags)), vec!["hello", " world"]);
    }
}
