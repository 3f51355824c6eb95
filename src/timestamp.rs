use crate::{error::TimestampError, types::RawTimestamp};
use chrono::{DateTime, NaiveDateTime, format::ParseErrorKind};

/// Day precision used on edges.
pub const EDGE_DATE_FORMAT: &str = "%Y-%m-%d";

/// A way a stored transaction time may be written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeFormat {
    /// `chrono` strftime pattern for a naive date-time.
    Pattern(&'static str),
    /// Seconds since the Unix epoch, UTC.
    EpochSeconds,
}

/// Accepted formats, tried in this order.
pub const ACCEPTED_FORMATS: &[TimeFormat] = &[
    TimeFormat::Pattern("%Y-%m-%d %H:%M:%S"),
    TimeFormat::Pattern("%Y-%m-%dT%H:%M:%S"),
    TimeFormat::EpochSeconds,
];

fn from_epoch(secs: i64) -> Result<NaiveDateTime, TimestampError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| TimestampError::OutOfRange(secs.to_string()))
}

/// Parses a stored transaction time.
///
/// Text is tried against every entry of [`ACCEPTED_FORMATS`] in order. Text that
/// fits a format but names an impossible instant (February 30th, month 13, an
/// epoch beyond chrono's range) is [`TimestampError::OutOfRange`]; text no format
/// reads at all is [`TimestampError::Unrecognized`].
pub fn parse_timestamp(raw: &RawTimestamp) -> Result<NaiveDateTime, TimestampError> {
    let text = match raw {
        RawTimestamp::Epoch(secs) => return from_epoch(*secs),
        RawTimestamp::Text(text) => text.trim(),
    };

    let mut out_of_range = false;
    for format in ACCEPTED_FORMATS {
        match format {
            TimeFormat::Pattern(pattern) => match NaiveDateTime::parse_from_str(text, pattern) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => out_of_range |= e.kind() == ParseErrorKind::OutOfRange,
            },
            TimeFormat::EpochSeconds => {
                if let Ok(secs) = text.parse::<i64>() {
                    return from_epoch(secs);
                }
            }
        }
    }

    if out_of_range {
        Err(TimestampError::OutOfRange(text.to_string()))
    } else {
        Err(TimestampError::Unrecognized(text.to_string()))
    }
}

/// Parses `raw` and renders it with [`EDGE_DATE_FORMAT`].
pub fn edge_date(raw: &RawTimestamp) -> Result<String, TimestampError> {
    parse_timestamp(raw).map(|dt| dt.format(EDGE_DATE_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_text_is_accepted() {
        let date = edge_date(&RawTimestamp::from("2024-01-01 00:00:00")).unwrap();
        assert_eq!(date, "2024-01-01");
    }

    #[test]
    fn iso_text_is_accepted() {
        let date = edge_date(&RawTimestamp::from("2023-06-15T12:30:00")).unwrap();
        assert_eq!(date, "2023-06-15");
    }

    #[test]
    fn numeric_text_falls_back_to_epoch() {
        // 2009-01-03 18:15:05 UTC, the genesis block
        let date = edge_date(&RawTimestamp::from("1231006505")).unwrap();
        assert_eq!(date, "2009-01-03");
    }

    #[test]
    fn integer_epoch_is_accepted() {
        let date = edge_date(&RawTimestamp::Epoch(1_704_067_200)).unwrap();
        assert_eq!(date, "2024-01-01");
    }

    #[test]
    fn garbage_is_unrecognized() {
        let err = parse_timestamp(&RawTimestamp::from("yesterday")).unwrap_err();
        assert_eq!(err, TimestampError::Unrecognized("yesterday".into()));
    }

    #[test]
    fn huge_epoch_is_out_of_range() {
        let err = parse_timestamp(&RawTimestamp::Epoch(i64::MAX)).unwrap_err();
        assert_eq!(err, TimestampError::OutOfRange(i64::MAX.to_string()));

        let err = parse_timestamp(&RawTimestamp::from(i64::MAX.to_string().as_str())).unwrap_err();
        assert_eq!(err, TimestampError::OutOfRange(i64::MAX.to_string()));
    }

    #[test]
    fn impossible_calendar_dates_are_out_of_range() {
        for text in ["2024-02-30 00:00:00", "2024-13-01 00:00:00", "2023-02-29T10:00:00"] {
            let err = parse_timestamp(&RawTimestamp::from(text)).unwrap_err();
            assert_eq!(err, TimestampError::OutOfRange(text.into()));
        }
    }

    #[test]
    fn leap_day_is_accepted() {
        let date = edge_date(&RawTimestamp::from("2024-02-29 23:59:59")).unwrap();
        assert_eq!(date, "2024-02-29");
    }
}
