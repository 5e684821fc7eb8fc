//! Service descriptions and driver operation options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::volume::Volume;
use crate::attachments::AttachmentsMask;

/// Kind of storage a driver provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Block,
    Nas,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub storage_type: StorageType,
}

/// Public description of a configured storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub driver: DriverInfo,
}

/// Options for listing volumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumesOpts {
    pub attachments: AttachmentsMask,
}

/// Options for inspecting one volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeInspectOpts {
    pub attachments: AttachmentsMask,
}

/// Options for creating a volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeCreateOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// Driver-specific options passed through untouched.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub opts: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeAttachOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_device: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeDetachOpts {
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeRemoveOpts {
    pub force: bool,
}

/// Result of attaching a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachResponse {
    pub volume: Volume,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub attach_token: String,
}
