//! Error types shared by the lessonbook crates

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure to interpret a stored or configured value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("Invalid timestamp '{value}': {message}")]
    InvalidTimestamp { value: String, message: String },
}

impl ParseError {
    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownValue {
            kind,
            value: value.into(),
        }
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> ParseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ParseError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_normalizes_offsets() {
        let a = parse_timestamp("2025-03-01T19:00:00+09:00").unwrap();
        let b = parse_timestamp("2025-03-01T10:00:00Z").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("next tuesday").unwrap_err();
        assert!(matches!(err, ParseError::InvalidTimestamp { .. }));
    }
}
