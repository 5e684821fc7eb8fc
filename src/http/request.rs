//! Request parsing: identity headers, query flags and JSON bodies.

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::attachments::AttachmentsMask;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::service::ServiceRegistry;
use crate::types::{InstanceId, LocalDevices, VolumeCreateOpts};

/// Header naming the calling user.
pub const USER_HEADER: &str = "x-volplane-user";

/// Header carrying the caller's instance IDs as `service=id` pairs. May be
/// repeated or hold several comma-separated pairs.
pub const INSTANCE_ID_HEADER: &str = "x-volplane-instance-id";

/// Header carrying the devices present on the caller's instance as
/// `service=device:mount,device:mount`. One service per value; repeat the
/// header for more. The mount point may be left out.
pub const LOCAL_DEVICES_HEADER: &str = "x-volplane-local-devices";

/// Builds the request context from the identity headers.
///
/// Pairs naming an unknown service, or without a `=`, are ignored.
pub(crate) fn context(headers: &HeaderMap, services: &ServiceRegistry) -> RequestContext {
    let mut ctx = RequestContext::new();
    if let Some(user) = headers.get(USER_HEADER).and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_user(user);
    }
    for value in headers.get_all(INSTANCE_ID_HEADER) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(',') {
            let Some((service, id)) = pair.trim().split_once('=') else {
                tracing::debug!(pair, "ignoring malformed instance ID");
                continue;
            };
            match services.get(service.trim()) {
                Ok(svc) => {
                    let iid = InstanceId::new(svc.driver().name(), id.trim());
                    ctx = ctx.with_instance_id(svc.name(), iid);
                },
                Err(_) => tracing::debug!(service, "instance ID for unknown service"),
            }
        }
    }
    for value in headers.get_all(LOCAL_DEVICES_HEADER) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let Some((service, devices)) = value.split_once('=') else {
            tracing::debug!(value, "ignoring malformed local devices");
            continue;
        };
        match services.get(service.trim()) {
            Ok(svc) => {
                let devices = local_devices(svc.driver().name(), devices);
                ctx = ctx.with_local_devices(svc.name(), devices);
            },
            Err(_) => tracing::debug!(service, "local devices for unknown service"),
        }
    }
    ctx
}

fn local_devices(driver: &str, list: &str) -> LocalDevices {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .fold(LocalDevices::new(driver), |devices, entry| {
            let (device, mount) = entry.split_once(':').unwrap_or((entry, ""));
            devices.with_device(device.trim(), mount.trim())
        })
}

/// Query flags shared by the list and inspect routes.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct ListQuery {
    pub attachments: Option<String>,
    pub filter: Option<String>,
    #[serde(rename = "async")]
    pub run_async: Option<String>,
    pub by_name: Option<String>,
}

impl ListQuery {
    pub fn mask(&self) -> Result<AttachmentsMask> {
        self.attachments
            .as_deref()
            .map_or(Ok(AttachmentsMask::NONE), str::parse::<AttachmentsMask>)
    }

    pub fn run_async(&self) -> bool {
        flag(self.run_async.as_deref())
    }

    pub fn by_name(&self) -> bool {
        flag(self.by_name.as_deref())
    }
}

/// Query flags selecting a `POST` action.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ActionQuery {
    pub attach: Option<String>,
    pub detach: Option<String>,
    pub copy: Option<String>,
    pub snapshot: Option<String>,
    pub create: Option<String>,
    pub force: Option<String>,
    #[serde(rename = "async")]
    pub run_async: Option<String>,
}

impl ActionQuery {
    pub fn run_async(&self) -> bool {
        flag(self.run_async.as_deref())
    }

    pub fn force(&self) -> bool {
        flag(self.force.as_deref())
    }
}

/// A bare `?flag` or any value other than `false`/`0` turns a flag on.
fn flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| !(v.eq_ignore_ascii_case("false") || v == "0"))
}

/// Parses an optional JSON body, falling back to `T::default()` when empty.
pub(crate) fn body<T: DeserializeOwned + Default>(bytes: &Bytes) -> Result<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| Error::InvalidRequest(e.to_string()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct VolumeCreateRequest {
    pub name: String,
    #[serde(flatten)]
    pub opts: VolumeCreateOpts,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct VolumeCopyRequest {
    pub volume_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct VolumeSnapshotRequest {
    pub snapshot_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct SnapshotCreateVolumeRequest {
    pub volume_name: String,
    #[serde(flatten)]
    pub opts: VolumeCreateOpts,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct SnapshotCopyRequest {
    pub snapshot_name: String,
    #[serde(rename = "destinationID")]
    pub destination_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MockDriver;
    use crate::service::StorageService;
    use crate::task::TaskRegistry;
    use axum::http::HeaderValue;
    use std::sync::Arc;

    #[tokio::test]
    async fn instance_ids_from_headers() {
        let mut services = ServiceRegistry::new();
        services.insert(StorageService::new(
            "ebs",
            Arc::new(MockDriver::new("ebs")),
            TaskRegistry::new(),
            1,
        ));
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        headers.append(
            INSTANCE_ID_HEADER,
            HeaderValue::from_static("EBS=i-1, nfs=host-2, junk"),
        );

        let ctx = context(&headers, &services);
        assert_eq!(ctx.user(), Some("alice"));
        let iid = ctx.instance_id("ebs").unwrap();
        assert_eq!(iid.id, "i-1");
        assert_eq!(iid.driver, "mock");
        assert!(ctx.instance_id("nfs").is_none());
    }

    #[tokio::test]
    async fn local_devices_from_headers() {
        let mut services = ServiceRegistry::new();
        services.insert(StorageService::new(
            "ebs",
            Arc::new(MockDriver::new("ebs")),
            TaskRegistry::new(),
            1,
        ));
        let mut headers = HeaderMap::new();
        headers.append(
            LOCAL_DEVICES_HEADER,
            HeaderValue::from_static("EBS=/dev/xvdf:/mnt/data, /dev/xvdg"),
        );
        headers.append(LOCAL_DEVICES_HEADER, HeaderValue::from_static("nfs=/dev/sdb"));
        headers.append(LOCAL_DEVICES_HEADER, HeaderValue::from_static("junk"));

        let ctx = context(&headers, &services);
        let devices = ctx.local_devices("ebs").unwrap();
        assert_eq!(devices.driver, "mock");
        assert_eq!(devices.device_map["/dev/xvdf"], "/mnt/data");
        assert_eq!(devices.device_map["/dev/xvdg"], "");
        assert!(ctx.local_devices("nfs").is_none());
    }

    #[test]
    fn flags() {
        assert!(flag(Some("")));
        assert!(flag(Some("true")));
        assert!(!flag(Some("False")));
        assert!(!flag(None));
    }

    #[test]
    fn empty_body_is_default() {
        let req: VolumeCopyRequest = body(&Bytes::from_static(b"  ")).unwrap();
        assert_eq!(req.volume_name, "");
        let req: VolumeCreateRequest =
            body(&Bytes::from_static(br#"{"name":"data","size":8}"#)).unwrap();
        assert_eq!(req.name, "data");
        assert_eq!(req.opts.size, Some(8));
    }
}
