//! In-memory storage driver.
//!
//! Keeps volumes and snapshots in [`DashMap`]s. Useful for local runs and
//! tests: it can be seeded, slowed down, or made to fail every call, and it
//! records the highest number of calls it ever saw in flight.
//!
//! Listings and inspections honor the attachments mask the way a real
//! backend does: attachments only when requested, and device names only
//! when devices are requested and the device is among the caller's local
//! devices.
//!
//! # Options
//!
//! ```toml
//! [services.local.options]
//! delay_ms = 10          # sleep inside every call
//! fail = "backend down"  # fail every call with this message
//! by_name = true         # support inspect-by-name natively
//! storage_type = "nas"
//!
//! [[services.local.options.volumes]]
//! id = "vol-1"
//! name = "data"
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::attachments::AttachmentsMask;
use crate::config::ServiceConfig;
use crate::context::RequestContext;
use crate::driver::StorageDriver;
use crate::error::{Error, Result};
use crate::types::{
    InstanceId, LocalDevices, Snapshot, StorageType, Volume, VolumeAttachOpts, VolumeAttachResponse,
    VolumeAttachment, VolumeCreateOpts, VolumeDetachOpts, VolumeInspectOpts, VolumeRemoveOpts,
    VolumesOpts,
};

const DRIVER_NAME: &str = "mock";
const DEFAULT_DEVICE: &str = "/dev/xvdf";

/// Behavior switches for [`MockDriver`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MockOptions {
    /// Fail every call with this message.
    pub fail: Option<String>,
    /// Milliseconds to block inside every call.
    pub delay_ms: u64,
    /// Implement inspect-by-name instead of leaving it to the caller.
    pub by_name: bool,
    pub storage_type: StorageType,
    pub volumes: Vec<Volume>,
    pub snapshots: Vec<Snapshot>,
}

/// An in-memory [`StorageDriver`].
#[derive(Debug)]
pub struct MockDriver {
    service: String,
    options: MockOptions,
    volumes: DashMap<String, Volume>,
    snapshots: DashMap<String, Snapshot>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockDriver {
    pub fn new(service: &str) -> Self {
        Self::with_options(service, MockOptions::default())
    }

    pub fn with_options(service: &str, mut options: MockOptions) -> Self {
        let volumes = options
            .volumes
            .drain(..)
            .map(|v| (v.id.clone(), v))
            .collect();
        let snapshots = options
            .snapshots
            .drain(..)
            .map(|s| (s.id.clone(), s))
            .collect();
        Self {
            service: service.to_string(),
            options,
            volumes,
            snapshots,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Builds the driver from a service's `options` table.
    pub fn from_config(service: &str, config: &ServiceConfig) -> Result<Self> {
        let options: MockOptions =
            serde_json::from_value(serde_json::Value::Object(config.options.clone()))
                .map_err(|e| Error::Config(format!("service '{service}': {e}")))?;
        Ok(Self::with_options(service, options))
    }

    /// Seeds a volume.
    pub fn insert_volume(&self, volume: Volume) {
        self.volumes.insert(volume.id.clone(), volume);
    }

    /// Seeds a snapshot.
    pub fn insert_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.insert(snapshot.id.clone(), snapshot);
    }

    /// Highest number of calls that were ever running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total number of calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bookkeeping shared by every call: counts, delay and forced failure.
    fn enter(&self, operation: &'static str) -> Result<CallGuard<'_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = CallGuard {
            in_flight: &self.in_flight,
        };

        tracing::trace!(service = %self.service, operation, "mock call");
        if self.options.delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.options.delay_ms));
        }
        if let Some(message) = &self.options.fail {
            return Err(Error::backend(DRIVER_NAME, message.clone()));
        }
        Ok(guard)
    }

    /// The caller's local devices, required only when devices are requested.
    fn local_devices<'a>(
        &self,
        ctx: &'a RequestContext,
        mask: AttachmentsMask,
    ) -> Result<Option<&'a LocalDevices>> {
        if !mask.devices() {
            return Ok(None);
        }
        ctx.require_local_devices(&self.service).map(Some)
    }

    fn volume(&self, volume_id: &str) -> Result<Volume> {
        self.volumes
            .get(volume_id)
            .map(|v| v.clone())
            .ok_or_else(|| Error::not_found("volume", volume_id))
    }

    fn new_volume(name: &str, opts: &VolumeCreateOpts) -> Volume {
        let mut volume = Volume::new(format!("vol-{}", Uuid::new_v4().simple()), name);
        volume.size = opts.size;
        volume.iops = opts.iops;
        volume.volume_type = opts.volume_type.clone();
        volume.availability_zone = opts.availability_zone.clone();
        volume.status = Some("available".to_string());
        if opts.encrypted {
            volume
                .fields
                .insert("encrypted".to_string(), "true".to_string());
        }
        volume
    }

    fn store(&self, volume: Volume) -> Volume {
        self.volumes.insert(volume.id.clone(), volume.clone());
        volume
    }
}

struct CallGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shapes a stored volume's attachments for a caller.
fn present(mut volume: Volume, mask: AttachmentsMask, local: Option<&LocalDevices>) -> Volume {
    if !mask.requested() {
        volume.attachments.clear();
        return volume;
    }
    for attachment in &mut volume.attachments {
        let known = local.is_some_and(|devices| {
            attachment
                .device_name
                .as_deref()
                .is_some_and(|device| devices.contains(device))
        });
        if !known {
            attachment.device_name = None;
        }
    }
    volume
}

fn same_instance(attachment: &VolumeAttachment, instance: &InstanceId) -> bool {
    attachment
        .instance_id
        .as_ref()
        .is_some_and(|i| i.id.eq_ignore_ascii_case(&instance.id))
}

impl StorageDriver for MockDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn storage_type(&self) -> StorageType {
        self.options.storage_type
    }

    fn volumes(&self, ctx: &RequestContext, opts: &VolumesOpts) -> Result<Vec<Volume>> {
        let _guard = self.enter("volumes")?;
        let local = self.local_devices(ctx, opts.attachments)?;
        let mut volumes: Vec<Volume> = self
            .volumes
            .iter()
            .map(|v| present(v.value().clone(), opts.attachments, local))
            .collect();
        volumes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(volumes)
    }

    fn volume_inspect(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
        opts: &VolumeInspectOpts,
    ) -> Result<Volume> {
        let _guard = self.enter("volume_inspect")?;
        let local = self.local_devices(ctx, opts.attachments)?;
        Ok(present(self.volume(volume_id)?, opts.attachments, local))
    }

    fn volume_inspect_by_name(
        &self,
        ctx: &RequestContext,
        volume_name: &str,
        opts: &VolumeInspectOpts,
    ) -> Result<Volume> {
        if !self.options.by_name {
            return Err(Error::not_implemented(DRIVER_NAME, "volume_inspect_by_name"));
        }
        let _guard = self.enter("volume_inspect_by_name")?;
        let local = self.local_devices(ctx, opts.attachments)?;
        self.volumes
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(volume_name))
            .map(|v| present(v.value().clone(), opts.attachments, local))
            .ok_or_else(|| Error::not_found("volume", volume_name))
    }

    fn volume_create(
        &self,
        _ctx: &RequestContext,
        volume_name: &str,
        opts: &VolumeCreateOpts,
    ) -> Result<Volume> {
        let _guard = self.enter("volume_create")?;
        Ok(self.store(Self::new_volume(volume_name, opts)))
    }

    fn volume_create_from_snapshot(
        &self,
        _ctx: &RequestContext,
        snapshot_id: &str,
        volume_name: &str,
        opts: &VolumeCreateOpts,
    ) -> Result<Volume> {
        let _guard = self.enter("volume_create_from_snapshot")?;
        let snapshot = self
            .snapshots
            .get(snapshot_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::not_found("snapshot", snapshot_id))?;
        let mut volume = Self::new_volume(volume_name, opts);
        volume.size = volume.size.or(snapshot.volume_size);
        volume
            .fields
            .insert("snapshotID".to_string(), snapshot.id.clone());
        Ok(self.store(volume))
    }

    fn volume_copy(
        &self,
        _ctx: &RequestContext,
        volume_id: &str,
        volume_name: &str,
    ) -> Result<Volume> {
        let _guard = self.enter("volume_copy")?;
        let source = self.volume(volume_id)?;
        let opts = VolumeCreateOpts {
            size: source.size,
            iops: source.iops,
            volume_type: source.volume_type.clone(),
            availability_zone: source.availability_zone.clone(),
            ..VolumeCreateOpts::default()
        };
        Ok(self.store(Self::new_volume(volume_name, &opts)))
    }

    fn volume_snapshot(
        &self,
        _ctx: &RequestContext,
        volume_id: &str,
        snapshot_name: &str,
    ) -> Result<Snapshot> {
        let _guard = self.enter("volume_snapshot")?;
        let volume = self.volume(volume_id)?;
        let snapshot = Snapshot {
            id: format!("snap-{}", Uuid::new_v4().simple()),
            name: snapshot_name.to_string(),
            volume_id: volume.id,
            volume_size: volume.size,
            status: Some("completed".to_string()),
            start_time: Some(chrono::Utc::now().timestamp()),
            ..Snapshot::default()
        };
        self.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    fn volume_remove(
        &self,
        _ctx: &RequestContext,
        volume_id: &str,
        opts: &VolumeRemoveOpts,
    ) -> Result<()> {
        let _guard = self.enter("volume_remove")?;
        let volume = self.volume(volume_id)?;
        if !volume.attachments.is_empty() && !opts.force {
            return Err(Error::backend(
                DRIVER_NAME,
                format!("volume {volume_id} is attached"),
            ));
        }
        self.volumes.remove(volume_id);
        Ok(())
    }

    fn volume_attach(
        &self,
        _ctx: &RequestContext,
        volume_id: &str,
        instance: &InstanceId,
        opts: &VolumeAttachOpts,
    ) -> Result<VolumeAttachResponse> {
        let _guard = self.enter("volume_attach")?;
        let mut volume = self.volume(volume_id)?;
        let elsewhere = volume
            .attachments
            .iter()
            .any(|a| !same_instance(a, instance));
        if elsewhere && !opts.force {
            return Err(Error::backend(
                DRIVER_NAME,
                format!("volume {volume_id} is attached to another instance"),
            ));
        }
        volume.attachments = vec![VolumeAttachment {
            volume_id: volume.id.clone(),
            instance_id: Some(instance.clone()),
            device_name: Some(
                opts.next_device
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            ),
            status: Some("attached".to_string()),
            ..VolumeAttachment::default()
        }];
        volume.status = Some("in-use".to_string());
        Ok(VolumeAttachResponse {
            volume: self.store(volume),
            attach_token: Uuid::new_v4().to_string(),
        })
    }

    fn volume_detach(
        &self,
        _ctx: &RequestContext,
        volume_id: &str,
        instance: &InstanceId,
        opts: &VolumeDetachOpts,
    ) -> Result<Volume> {
        let _guard = self.enter("volume_detach")?;
        let mut volume = self.volume(volume_id)?;
        let before = volume.attachments.len();
        volume
            .attachments
            .retain(|a| !opts.force && !same_instance(a, instance));
        if volume.attachments.len() == before && !opts.force {
            return Err(Error::backend(
                DRIVER_NAME,
                format!("volume {volume_id} is not attached to {}", instance.id),
            ));
        }
        if volume.attachments.is_empty() {
            volume.status = Some("available".to_string());
        }
        Ok(self.store(volume))
    }

    fn snapshots(&self, _ctx: &RequestContext) -> Result<Vec<Snapshot>> {
        let _guard = self.enter("snapshots")?;
        let mut snapshots: Vec<Snapshot> =
            self.snapshots.iter().map(|s| s.value().clone()).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    fn snapshot_inspect(&self, _ctx: &RequestContext, snapshot_id: &str) -> Result<Snapshot> {
        let _guard = self.enter("snapshot_inspect")?;
        self.snapshots
            .get(snapshot_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::not_found("snapshot", snapshot_id))
    }

    fn snapshot_copy(
        &self,
        _ctx: &RequestContext,
        snapshot_id: &str,
        snapshot_name: &str,
        destination_id: Option<&str>,
    ) -> Result<Snapshot> {
        let _guard = self.enter("snapshot_copy")?;
        let source = self
            .snapshots
            .get(snapshot_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::not_found("snapshot", snapshot_id))?;
        let mut copy = Snapshot {
            id: format!("snap-{}", Uuid::new_v4().simple()),
            name: snapshot_name.to_string(),
            start_time: Some(chrono::Utc::now().timestamp()),
            ..source
        };
        if let Some(destination) = destination_id {
            copy.fields
                .insert("destinationID".to_string(), destination.to_string());
        }
        self.snapshots.insert(copy.id.clone(), copy.clone());
        Ok(copy)
    }

    fn snapshot_remove(&self, _ctx: &RequestContext, snapshot_id: &str) -> Result<()> {
        let _guard = self.enter("snapshot_remove")?;
        self.snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("snapshot", snapshot_id))
    }
}
