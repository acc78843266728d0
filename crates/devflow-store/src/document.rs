//! Stored documents and server timestamps

use crate::error::StoreError;
use crate::path::DocPath;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field map of a document
pub type Fields = serde_json::Map<String, Value>;

/// Microseconds since the Unix epoch
///
/// Stored as a plain integer so that ordering in queries is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Wall-clock now (not monotonic, see the store's server clock)
    #[inline]
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_micros())
    }

    /// From raw microseconds
    #[inline]
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Raw microseconds
    #[inline]
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// As a chrono date-time
    #[must_use]
    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_micros(self.0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::from(value.0)
    }
}

/// A document as returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Full path
    pub path: DocPath,
    /// User fields
    pub fields: Fields,
    /// Store-assigned version of the last write
    pub version: u64,
    /// Server time of creation
    pub create_time: Timestamp,
    /// Server time of last write
    pub update_time: Timestamp,
}

impl Document {
    /// Document id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        self.path.id()
    }

    /// Raw field access
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Decode into a typed value
    ///
    /// The document id is injected as an `id` field unless one is stored.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut fields = self.fields.clone();
        fields
            .entry("id")
            .or_insert_with(|| Value::String(self.id().to_string()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            StoreError::Serialization(format!("{}: {e}", self.path))
        })
    }
}

/// Encode a serializable value as a field map
pub fn encode_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Serialization(format!(
            "expected an object, got {other}"
        ))),
    }
}
