//! Notification data models

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Auxiliary value attached to a notification, e.g. the id of a related
/// brand or event. Opaque to the notification subsystem: any JSON value is
/// accepted so one unusual entry never rejects the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// Arrays and objects, kept verbatim
    Structured(serde_json::Value),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => f.write_str("null"),
            DataValue::Bool(b) => write!(f, "{}", b),
            DataValue::Number(n) => write!(f, "{}", n),
            DataValue::Text(s) => f.write_str(s),
            DataValue::Structured(value) => write!(f, "{}", value),
        }
    }
}

/// A single notification, as delivered by both the REST API and the push stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: BTreeMap<String, DataValue>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: String,
}

impl NotificationRecord {
    /// Parsed creation time. `None` when the backend sent something that is
    /// not RFC 3339; the record itself stays valid.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, DataValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<BTreeMap<String, DataValue>>::deserialize(deserializer).map(Option::unwrap_or_default)
}
