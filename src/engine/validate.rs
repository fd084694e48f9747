use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::{Ms, Span};

use super::error::TimeError;
use super::BookingError;

/// A timestamp as clients send it: RFC 3339 text or unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeInput {
    Millis(Ms),
    Text(String),
}

impl TimeInput {
    pub fn parse(&self, field: &'static str) -> Result<Ms, TimeError> {
        match self {
            TimeInput::Millis(ms) => Ok(*ms),
            TimeInput::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|t| t.with_timezone(&Utc).timestamp_millis())
                .map_err(|_| TimeError::Unparsable {
                    field,
                    value: text.clone(),
                }),
        }
    }
}

impl From<DateTime<Utc>> for TimeInput {
    fn from(t: DateTime<Utc>) -> Self {
        TimeInput::Millis(t.timestamp_millis())
    }
}

impl From<&str> for TimeInput {
    fn from(s: &str) -> Self {
        TimeInput::Text(s.to_string())
    }
}

pub(crate) fn validate_times(start: &TimeInput, end: &TimeInput) -> Result<Span, BookingError> {
    let start = start.parse("startTime")?;
    let end = end.parse("endTime")?;
    validate_span(start, end)
}

/// Ordering and range checks on an already-absolute pair.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, BookingError> {
    if end <= start {
        return Err(TimeError::NotOrdered { start, end }.into());
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SPAN_DURATION_MS {
        return Err(BookingError::LimitExceeded("reservation too long"));
    }
    Ok(Span::new(start, end))
}

pub(crate) fn to_datetime(ms: Ms) -> Result<DateTime<Utc>, BookingError> {
    DateTime::from_timestamp_millis(ms).ok_or(BookingError::LimitExceeded("timestamp out of range"))
}
