use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

pub const ENTITY_KEY_FIELD: &str = "driver_number";
pub const TIMESTAMP_FIELD: &str = "date";

/// One dated upstream record for a tracked entity.
///
/// The payload keeps every upstream field, including the entity key and timestamp, so
/// that serializing a record reproduces what the feed sent.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub entity_key: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    NotAnObject,
    MissingEntityKey,
    InvalidEntityKey,
    MissingTimestamp,
    InvalidTimestamp,
}

impl RecordError {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordError::NotAnObject => "not_an_object",
            RecordError::MissingEntityKey => "missing_entity_key",
            RecordError::InvalidEntityKey => "invalid_entity_key",
            RecordError::MissingTimestamp => "missing_timestamp",
            RecordError::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::NotAnObject => write!(f, "record is not a JSON object"),
            RecordError::MissingEntityKey => write!(f, "record has no {}", ENTITY_KEY_FIELD),
            RecordError::InvalidEntityKey => {
                write!(f, "record {} is not a non-negative integer", ENTITY_KEY_FIELD)
            }
            RecordError::MissingTimestamp => write!(f, "record has no timestamp"),
            RecordError::InvalidTimestamp => write!(f, "record timestamp is not RFC 3339"),
        }
    }
}

impl std::error::Error for RecordError {}

impl EventRecord {
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        Self::from_value_with(value, TIMESTAMP_FIELD)
    }

    pub fn from_value_with(value: Value, timestamp_field: &str) -> Result<Self, RecordError> {
        let Value::Object(payload) = value else {
            return Err(RecordError::NotAnObject);
        };

        let entity_key = match payload.get(ENTITY_KEY_FIELD) {
            None | Some(Value::Null) => return Err(RecordError::MissingEntityKey),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or(RecordError::InvalidEntityKey)?,
        };

        let timestamp = match payload.get(timestamp_field) {
            None | Some(Value::Null) => return Err(RecordError::MissingTimestamp),
            Some(Value::String(raw)) => {
                parse_timestamp(raw).ok_or(RecordError::InvalidTimestamp)?
            }
            Some(_) => return Err(RecordError::InvalidTimestamp),
        };

        Ok(Self {
            entity_key,
            timestamp,
            payload,
        })
    }

    /// Integer rank stored under `field`, if present and numeric.
    pub fn rank(&self, field: &str) -> Option<u64> {
        let value = self.payload.get(field)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.payload
            .get(field)
            .and_then(Value::as_f64)
            .filter(|f| f.is_finite())
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.payload.insert(field.to_string(), value);
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }
}

/// Parses upstream timestamps: RFC 3339, or a bare ISO datetime taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
