//! Snapshot types.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use super::volume::lookup_field;
use crate::filter::Filterable;

/// A point-in-time copy of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "volumeID", default, skip_serializing_if = "String::is_empty")]
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Filterable for Snapshot {
    fn attribute(&self, name: &str) -> Option<Cow<'_, str>> {
        let lower = name.to_ascii_lowercase();
        if let Some(key) = lower.strip_prefix("fields.") {
            return lookup_field(&self.fields, key);
        }
        match lower.as_str() {
            "id" => Some(Cow::Borrowed(&self.id)),
            "name" => Some(Cow::Borrowed(&self.name)),
            "description" => self.description.as_deref().map(Cow::Borrowed),
            "volumeid" => Some(Cow::Borrowed(&self.volume_id)),
            "volumesize" => self.volume_size.map(|v| Cow::Owned(v.to_string())),
            "status" => self.status.as_deref().map(Cow::Borrowed),
            "starttime" => self.start_time.map(|v| Cow::Owned(v.to_string())),
            _ => None,
        }
    }
}

/// Snapshots of one service keyed by snapshot ID.
pub type SnapshotMap = BTreeMap<String, Snapshot>;

/// Snapshots of every service keyed by service name.
pub type ServiceSnapshotMap = BTreeMap<String, SnapshotMap>;
