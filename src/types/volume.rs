//! Volume, attachment and instance identity types.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::filter::Filterable;

/// A volume's attachment relationship to the calling instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeAttachmentState {
    /// Not yet determined; the resolver computes it.
    #[default]
    Unset,
    /// Attached to the calling instance.
    Attached,
    /// Not attached to any instance.
    Available,
    /// Attached to some other instance.
    Unavailable,
}

impl VolumeAttachmentState {
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Attached => "attached",
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Identity of a compute instance as reported by a storage driver.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceId {
    pub id: String,
    pub driver: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl InstanceId {
    pub fn new(driver: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            driver: driver.into(),
            fields: BTreeMap::new(),
        }
    }
}

/// Block devices present on the caller's instance, as its client reports
/// them: device name to mount point (empty when unmounted).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDevices {
    pub driver: String,
    #[serde(default)]
    pub device_map: BTreeMap<String, String>,
}

impl LocalDevices {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            device_map: BTreeMap::new(),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>, mount_point: impl Into<String>) -> Self {
        self.device_map.insert(device.into(), mount_point.into());
        self
    }

    /// Whether `device` is present on the instance.
    pub fn contains(&self, device: &str) -> bool {
        self.device_map.contains_key(device)
    }
}

/// A volume's connection to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    #[serde(rename = "volumeID")]
    pub volume_id: String,
    #[serde(rename = "instanceID", default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

/// A block, NAS or object volume.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<VolumeAttachment>,
    #[serde(default, skip_serializing_if = "is_unset")]
    pub attachment_state: VolumeAttachmentState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

fn is_unset(state: &VolumeAttachmentState) -> bool {
    !state.is_set()
}

impl Volume {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Filterable for Volume {
    fn attribute(&self, name: &str) -> Option<Cow<'_, str>> {
        let lower = name.to_ascii_lowercase();
        if let Some(key) = lower.strip_prefix("fields.") {
            return lookup_field(&self.fields, key);
        }
        match lower.as_str() {
            "id" => Some(Cow::Borrowed(&self.id)),
            "name" => Some(Cow::Borrowed(&self.name)),
            "type" => self.volume_type.as_deref().map(Cow::Borrowed),
            "size" => self.size.map(|v| Cow::Owned(v.to_string())),
            "iops" => self.iops.map(|v| Cow::Owned(v.to_string())),
            "status" => self.status.as_deref().map(Cow::Borrowed),
            "availabilityzone" => self.availability_zone.as_deref().map(Cow::Borrowed),
            "networkname" => self.network_name.as_deref().map(Cow::Borrowed),
            "attachmentstate" => Some(Cow::Borrowed(self.attachment_state.as_str())),
            _ => None,
        }
    }
}

pub(crate) fn lookup_field<'a>(
    fields: &'a BTreeMap<String, String>,
    key: &str,
) -> Option<Cow<'a, str>> {
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| Cow::Borrowed(v.as_str()))
}

/// Volumes of one service keyed by volume ID.
pub type VolumeMap = BTreeMap<String, Volume>;

/// Volumes of every service keyed by service name.
pub type ServiceVolumeMap = BTreeMap<String, VolumeMap>;
