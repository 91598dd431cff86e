//! Conversation metadata as returned by the remote list endpoint.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A remote conversation's metadata.
///
/// Only `id` and `updated_at` are interpreted; every other field is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(
        rename = "update_time",
        alias = "updated_at",
        alias = "updatedAt",
        deserialize_with = "deserialize_timestamp"
    )]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            updated_at,
            extra: Map::new(),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.extra
            .insert("title".to_string(), Value::String(title.to_string()));
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.extra.get("title").and_then(Value::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Seconds(f64),
}

/// Accepts RFC 3339 strings or Unix epoch seconds (integer or fractional).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(de::Error::custom),
        RawTimestamp::Seconds(secs) => {
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1_000_000_000.0) as u32;
            DateTime::from_timestamp(whole as i64, nanos)
                .ok_or_else(|| de::Error::custom("timestamp out of range"))
        }
    }
}
