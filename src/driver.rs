//! Storage driver contract and registry.
//!
//! Drivers are synchronous and may block for as long as the backend takes.
//! They are only ever called from a service's [`BackendQueue`] on the
//! blocking pool, so an implementation never sees two calls at once unless
//! the service is configured with more than one worker.
//!
//! [`BackendQueue`]: crate::task::BackendQueue

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::context::RequestContext;
use crate::drivers::mock::MockDriver;
use crate::error::{Error, Result};
use crate::types::{
    InstanceId, Snapshot, StorageType, Volume, VolumeAttachOpts, VolumeAttachResponse,
    VolumeCreateOpts, VolumeDetachOpts, VolumeInspectOpts, VolumeRemoveOpts, VolumesOpts,
};

/// A storage backend.
///
/// Optional operations default to [`Error::NotImplemented`].
pub trait StorageDriver: Send + Sync + 'static {
    /// Driver name, e.g. `ebs`.
    fn name(&self) -> &str;

    fn storage_type(&self) -> StorageType;

    /// Lists volumes.
    fn volumes(&self, ctx: &RequestContext, opts: &VolumesOpts) -> Result<Vec<Volume>>;

    /// Inspects one volume by ID.
    fn volume_inspect(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
        opts: &VolumeInspectOpts,
    ) -> Result<Volume>;

    /// Inspects one volume by name. The orchestrator falls back to listing
    /// when this is not implemented.
    fn volume_inspect_by_name(
        &self,
        _ctx: &RequestContext,
        _volume_name: &str,
        _opts: &VolumeInspectOpts,
    ) -> Result<Volume> {
        Err(Error::not_implemented(self.name(), "volume_inspect_by_name"))
    }

    fn volume_create(
        &self,
        ctx: &RequestContext,
        volume_name: &str,
        opts: &VolumeCreateOpts,
    ) -> Result<Volume>;

    fn volume_create_from_snapshot(
        &self,
        _ctx: &RequestContext,
        _snapshot_id: &str,
        _volume_name: &str,
        _opts: &VolumeCreateOpts,
    ) -> Result<Volume> {
        Err(Error::not_implemented(self.name(), "volume_create_from_snapshot"))
    }

    fn volume_copy(
        &self,
        _ctx: &RequestContext,
        _volume_id: &str,
        _volume_name: &str,
    ) -> Result<Volume> {
        Err(Error::not_implemented(self.name(), "volume_copy"))
    }

    fn volume_snapshot(
        &self,
        _ctx: &RequestContext,
        _volume_id: &str,
        _snapshot_name: &str,
    ) -> Result<Snapshot> {
        Err(Error::not_implemented(self.name(), "volume_snapshot"))
    }

    fn volume_remove(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
        opts: &VolumeRemoveOpts,
    ) -> Result<()>;

    /// Attaches a volume to `instance`.
    fn volume_attach(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
        instance: &InstanceId,
        opts: &VolumeAttachOpts,
    ) -> Result<VolumeAttachResponse>;

    /// Detaches a volume from `instance`.
    fn volume_detach(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
        instance: &InstanceId,
        opts: &VolumeDetachOpts,
    ) -> Result<Volume>;

    fn snapshots(&self, _ctx: &RequestContext) -> Result<Vec<Snapshot>> {
        Err(Error::not_implemented(self.name(), "snapshots"))
    }

    fn snapshot_inspect(&self, _ctx: &RequestContext, _snapshot_id: &str) -> Result<Snapshot> {
        Err(Error::not_implemented(self.name(), "snapshot_inspect"))
    }

    /// Copies a snapshot, optionally into another region or account.
    fn snapshot_copy(
        &self,
        _ctx: &RequestContext,
        _snapshot_id: &str,
        _snapshot_name: &str,
        _destination_id: Option<&str>,
    ) -> Result<Snapshot> {
        Err(Error::not_implemented(self.name(), "snapshot_copy"))
    }

    fn snapshot_remove(&self, _ctx: &RequestContext, _snapshot_id: &str) -> Result<()> {
        Err(Error::not_implemented(self.name(), "snapshot_remove"))
    }
}

/// Builds a driver for one configured service.
pub type DriverConstructor =
    Arc<dyn Fn(&str, &ServiceConfig) -> Result<Arc<dyn StorageDriver>> + Send + Sync>;

/// Driver constructors by name.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    constructors: HashMap<String, DriverConstructor>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the drivers that ship with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("mock", |service, config| {
            Ok(Arc::new(MockDriver::from_config(service, config)?) as Arc<dyn StorageDriver>)
        });
        registry
    }

    /// Registers `constructor` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&str, &ServiceConfig) -> Result<Arc<dyn StorageDriver>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_ascii_lowercase(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_ascii_lowercase())
    }

    /// Constructs the driver for `service`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownDriver`] if no constructor is registered under
    /// `driver`, or whatever the constructor returns.
    pub fn build(
        &self,
        driver: &str,
        service: &str,
        config: &ServiceConfig,
    ) -> Result<Arc<dyn StorageDriver>> {
        let constructor = self
            .constructors
            .get(&driver.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownDriver {
                name: driver.to_string(),
            })?;
        constructor(service, config)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("DriverRegistry")
            .field("drivers", &names)
            .finish()
    }
}
