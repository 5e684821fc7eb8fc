//! Request orchestration.
//!
//! The [`Orchestrator`] turns a storage request into tasks. A request that
//! targets one service becomes one task on that service's queue. A request
//! that targets every service fans out into one task per service plus a
//! coordinating task that waits for all of them and merges the partial
//! results by service name:
//!
//! ```text
//!              ┌─ task(ebs)   ─┐
//! volumes() ───┼─ task(local) ─┼──► coordinator ──► { "ebs": {..}, "local": {..} }
//!              └─ task(nfs)   ─┘
//! ```
//!
//! If any service fails, the coordinator fails with
//! [`Error::BatchProcess`] carrying the results of every service that
//! succeeded and the first failure in service-name order.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::attachments::{self, AttachmentsMask};
use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::driver::{DriverRegistry, StorageDriver};
use crate::error::{Error, Result};
use crate::filter::{self, Filter};
use crate::schema::{ResultSchema, Schemas};
use crate::service::{ServiceRegistry, StorageService};
use crate::task::registry::TaskEntry;
use crate::task::TaskRegistry;
use crate::types::{
    InstanceId, ServiceInfo, SnapshotMap, Task, Volume, VolumeAttachOpts,
    VolumeAttachmentState, VolumeCreateOpts, VolumeDetachOpts, VolumeInspectOpts, VolumeMap,
    VolumeRemoveOpts, VolumesOpts,
};

/// Entry point for every storage operation.
///
/// Operations validate their inputs synchronously (unknown service, bad
/// filter, missing instance ID) and otherwise return the queued [`Task`]
/// immediately; wait on it through [`tasks`](Self::tasks).
#[derive(Debug, Clone)]
pub struct Orchestrator {
    tasks: TaskRegistry,
    services: ServiceRegistry,
    schemas: Schemas,
}

impl Orchestrator {
    pub fn new(tasks: TaskRegistry, services: ServiceRegistry) -> Result<Self> {
        Ok(Self {
            tasks,
            services,
            schemas: Schemas::compile()?,
        })
    }

    /// Builds the task registry and every configured service.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: &ServerConfig, drivers: &DriverRegistry) -> Result<Self> {
        let tasks = TaskRegistry::with_config(config.registry_config());
        let services = ServiceRegistry::from_config(config, drivers, &tasks)?;
        Self::new(tasks, services)
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Describes every configured service, in name order.
    pub fn service_infos(&self) -> Vec<ServiceInfo> {
        self.services.iter().map(|s| s.info()).collect()
    }

    pub fn service_inspect(&self, service: &str) -> Result<ServiceInfo> {
        Ok(self.services.get(service)?.info())
    }

    // ─── Volumes ────────────────────────────────────────────────────────

    /// Lists volumes of every service.
    ///
    /// Each volume's attachment state is resolved against the caller's
    /// instance ID for that service before `filter` is applied, so filters
    /// may test `attachmentState`.
    ///
    /// # Errors
    ///
    /// [`Error::BadFilter`] if `filter` does not compile. A missing instance
    /// ID fails only the services it is missing for.
    pub fn volumes(
        &self,
        ctx: &RequestContext,
        mask: AttachmentsMask,
        filter: Option<&str>,
    ) -> Result<Task> {
        let filter = compile_filter(filter)?;
        Ok(self.fan_out(
            ctx,
            "volumes",
            &self.schemas.volume_map,
            &self.schemas.service_volume_map,
            move |service, driver, ctx| list_volumes(service, driver, ctx, mask, filter.as_ref()),
        ))
    }

    /// Lists the volumes of one service.
    pub fn volumes_for_service(
        &self,
        ctx: &RequestContext,
        service: &str,
        mask: AttachmentsMask,
        filter: Option<&str>,
    ) -> Result<Task> {
        let filter = compile_filter(filter)?;
        let svc = self.services.get(service)?;
        if mask.requires_instance_id() {
            ctx.require_instance_id(svc.name())?;
        }
        let name = svc.name().to_string();
        Ok(svc.enqueue(
            ctx,
            "volumes",
            Some(self.schemas.volume_map.clone()),
            move |driver, ctx| list_volumes(&name, driver, ctx, mask, filter.as_ref()),
        ))
    }

    /// Inspects one volume by ID, or by name when `by_name` is set.
    ///
    /// Drivers without a native by-name lookup are answered by listing and
    /// matching names without regard to case. A volume the attachment mask
    /// excludes is reported as not found.
    pub fn volume_inspect(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume: &str,
        by_name: bool,
        mask: AttachmentsMask,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let caller = caller_for(svc.name(), ctx, mask)?.cloned();
        let key = volume.to_string();
        Ok(svc.enqueue(
            ctx,
            "volume_inspect",
            Some(self.schemas.volume.clone()),
            move |driver, ctx| {
                let opts = VolumeInspectOpts { attachments: mask };
                let mut volume = if by_name {
                    inspect_by_name(driver, ctx, &key, &opts)?
                } else {
                    driver.volume_inspect(ctx, &key, &opts)?
                };
                if !attachments::resolve(&mut volume, caller.as_ref(), mask) {
                    return Err(Error::not_found("volume", key));
                }
                Ok(volume)
            },
        ))
    }

    pub fn volume_create(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_name: &str,
        opts: VolumeCreateOpts,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let volume_name = volume_name.to_string();
        Ok(svc.enqueue(
            ctx,
            "volume_create",
            Some(self.schemas.volume.clone()),
            move |driver, ctx| {
                let volume = driver.volume_create(ctx, &volume_name, &opts)?;
                Ok(default_state(volume, VolumeAttachmentState::Available))
            },
        ))
    }

    pub fn volume_create_from_snapshot(
        &self,
        ctx: &RequestContext,
        service: &str,
        snapshot_id: &str,
        volume_name: &str,
        opts: VolumeCreateOpts,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let snapshot_id = snapshot_id.to_string();
        let volume_name = volume_name.to_string();
        Ok(svc.enqueue(
            ctx,
            "volume_create_from_snapshot",
            Some(self.schemas.volume.clone()),
            move |driver, ctx| {
                let volume =
                    driver.volume_create_from_snapshot(ctx, &snapshot_id, &volume_name, &opts)?;
                Ok(default_state(volume, VolumeAttachmentState::Available))
            },
        ))
    }

    pub fn volume_copy(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        volume_name: &str,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let volume_id = volume_id.to_string();
        let volume_name = volume_name.to_string();
        Ok(svc.enqueue(
            ctx,
            "volume_copy",
            Some(self.schemas.volume.clone()),
            move |driver, ctx| {
                let volume = driver.volume_copy(ctx, &volume_id, &volume_name)?;
                Ok(default_state(volume, VolumeAttachmentState::Available))
            },
        ))
    }

    pub fn volume_snapshot(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        snapshot_name: &str,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let volume_id = volume_id.to_string();
        let snapshot_name = snapshot_name.to_string();
        Ok(svc.enqueue(
            ctx,
            "volume_snapshot",
            Some(self.schemas.snapshot.clone()),
            move |driver, ctx| driver.volume_snapshot(ctx, &volume_id, &snapshot_name),
        ))
    }

    /// Attaches a volume to the caller's instance.
    ///
    /// # Errors
    ///
    /// [`Error::MissingInstanceId`] before anything is queued if the caller
    /// has no instance ID for `service`.
    pub fn volume_attach(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        opts: VolumeAttachOpts,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let instance = ctx.require_instance_id(svc.name())?.clone();
        let volume_id = volume_id.to_string();
        Ok(svc.enqueue(
            ctx,
            "volume_attach",
            Some(self.schemas.volume_attach.clone()),
            move |driver, ctx| {
                let mut response = driver.volume_attach(ctx, &volume_id, &instance, &opts)?;
                response.volume = default_state(response.volume, VolumeAttachmentState::Attached);
                Ok(response)
            },
        ))
    }

    /// Detaches a volume from the caller's instance.
    pub fn volume_detach(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        opts: VolumeDetachOpts,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let instance = ctx.require_instance_id(svc.name())?.clone();
        let volume_id = volume_id.to_string();
        Ok(svc.enqueue(
            ctx,
            "volume_detach",
            Some(self.schemas.volume.clone()),
            move |driver, ctx| {
                let volume = driver.volume_detach(ctx, &volume_id, &instance, &opts)?;
                Ok(default_state(volume, VolumeAttachmentState::Available))
            },
        ))
    }

    /// Detaches every volume attached to the caller, on every service.
    ///
    /// The instance ID is checked per service; a service the caller has no
    /// instance ID for fails with [`Error::MissingInstanceId`] inside the
    /// batch.
    pub fn volume_detach_all(&self, ctx: &RequestContext, opts: VolumeDetachOpts) -> Task {
        self.fan_out(
            ctx,
            "volume_detach_all",
            &self.schemas.volume_map,
            &self.schemas.service_volume_map,
            move |service, driver, ctx| detach_all(service, driver, ctx, opts),
        )
    }

    pub fn volume_detach_all_for_service(
        &self,
        ctx: &RequestContext,
        service: &str,
        opts: VolumeDetachOpts,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        ctx.require_instance_id(svc.name())?;
        let name = svc.name().to_string();
        Ok(svc.enqueue(
            ctx,
            "volume_detach_all",
            Some(self.schemas.volume_map.clone()),
            move |driver, ctx| detach_all(&name, driver, ctx, opts),
        ))
    }

    /// Removes a volume. The task result is `null`.
    pub fn volume_remove(
        &self,
        ctx: &RequestContext,
        service: &str,
        volume_id: &str,
        opts: VolumeRemoveOpts,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let volume_id = volume_id.to_string();
        Ok(svc.enqueue(ctx, "volume_remove", None, move |driver, ctx| {
            driver.volume_remove(ctx, &volume_id, &opts)
        }))
    }

    // ─── Snapshots ──────────────────────────────────────────────────────

    /// Lists snapshots of every service.
    pub fn snapshots(&self, ctx: &RequestContext, filter: Option<&str>) -> Result<Task> {
        let filter = compile_filter(filter)?;
        Ok(self.fan_out(
            ctx,
            "snapshots",
            &self.schemas.snapshot_map,
            &self.schemas.service_snapshot_map,
            move |_service, driver, ctx| list_snapshots(driver, ctx, filter.as_ref()),
        ))
    }

    pub fn snapshots_for_service(
        &self,
        ctx: &RequestContext,
        service: &str,
        filter: Option<&str>,
    ) -> Result<Task> {
        let filter = compile_filter(filter)?;
        let svc = self.services.get(service)?;
        Ok(svc.enqueue(
            ctx,
            "snapshots",
            Some(self.schemas.snapshot_map.clone()),
            move |driver, ctx| list_snapshots(driver, ctx, filter.as_ref()),
        ))
    }

    pub fn snapshot_inspect(
        &self,
        ctx: &RequestContext,
        service: &str,
        snapshot_id: &str,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let snapshot_id = snapshot_id.to_string();
        Ok(svc.enqueue(
            ctx,
            "snapshot_inspect",
            Some(self.schemas.snapshot.clone()),
            move |driver, ctx| driver.snapshot_inspect(ctx, &snapshot_id),
        ))
    }

    /// Copies a snapshot, optionally to another region or account.
    pub fn snapshot_copy(
        &self,
        ctx: &RequestContext,
        service: &str,
        snapshot_id: &str,
        snapshot_name: &str,
        destination_id: Option<&str>,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let snapshot_id = snapshot_id.to_string();
        let snapshot_name = snapshot_name.to_string();
        let destination_id = destination_id.map(str::to_string);
        Ok(svc.enqueue(
            ctx,
            "snapshot_copy",
            Some(self.schemas.snapshot.clone()),
            move |driver, ctx| {
                driver.snapshot_copy(ctx, &snapshot_id, &snapshot_name, destination_id.as_deref())
            },
        ))
    }

    pub fn snapshot_remove(
        &self,
        ctx: &RequestContext,
        service: &str,
        snapshot_id: &str,
    ) -> Result<Task> {
        let svc = self.services.get(service)?;
        let snapshot_id = snapshot_id.to_string();
        Ok(svc.enqueue(ctx, "snapshot_remove", None, move |driver, ctx| {
            driver.snapshot_remove(ctx, &snapshot_id)
        }))
    }

    // ─── Fan-out ────────────────────────────────────────────────────────

    /// Queues `run` on every service and a coordinator that merges the
    /// results into an object keyed by service name.
    fn fan_out<T, F>(
        &self,
        ctx: &RequestContext,
        name: &str,
        partial_schema: &ResultSchema,
        merged_schema: &ResultSchema,
        run: F,
    ) -> Task
    where
        T: Serialize,
        F: Fn(&str, &dyn StorageDriver, &RequestContext) -> Result<T>
            + Clone
            + Send
            + Sync
            + 'static,
    {
        // Entries, not IDs: a partial may be evicted before the coordinator runs.
        let mut pending: Vec<(String, Arc<TaskEntry>)> = Vec::with_capacity(self.services.len());
        for svc in self.services.iter() {
            let entry = enqueue_partial(svc, ctx, name, partial_schema, run.clone());
            pending.push((svc.name().to_string(), entry));
        }
        tracing::debug!(name, services = pending.len(), "fanned out request");

        self.tasks
            .enqueue(ctx, name, Some(merged_schema.clone()), async move {
                let done = join_all(pending.iter().map(|(_, entry)| entry.finished())).await;
                let names = pending.into_iter().map(|(service, _)| service);
                merge(names.zip(done))
            })
    }
}

fn enqueue_partial<T, F>(
    svc: &StorageService,
    ctx: &RequestContext,
    name: &str,
    schema: &ResultSchema,
    run: F,
) -> Arc<TaskEntry>
where
    T: Serialize,
    F: Fn(&str, &dyn StorageDriver, &RequestContext) -> Result<T> + Send + 'static,
{
    let service = svc.name().to_string();
    let (_, entry) = svc.enqueue_entry(ctx, name, Some(schema.clone()), move |driver, ctx| {
        run(&service, driver, ctx)
    });
    entry
}

/// Merges completed per-service tasks in the order given.
fn merge(done: impl IntoIterator<Item = (String, Task)>) -> Result<Value> {
    let mut completed = Map::new();
    let mut first_error = None;
    for (service, task) in done {
        match task.outcome() {
            Ok(result) => {
                completed.insert(service, result.unwrap_or(Value::Null));
            },
            Err(err) => {
                tracing::warn!(service = %service, task = task.id, error = %err, "service failed");
                first_error.get_or_insert(err);
            },
        }
    }
    match first_error {
        None => Ok(Value::Object(completed)),
        Some(err) => Err(Error::BatchProcess {
            completed,
            source: Arc::new(err),
        }),
    }
}

fn compile_filter(raw: Option<&str>) -> Result<Option<Filter>> {
    raw.filter(|f| !f.is_empty())
        .map(|raw| {
            filter::compile(raw).map_err(|source| Error::BadFilter {
                filter: raw.to_string(),
                source,
            })
        })
        .transpose()
}

fn default_state(mut volume: Volume, state: VolumeAttachmentState) -> Volume {
    if !volume.attachment_state.is_set() {
        volume.attachment_state = state;
    }
    volume
}

fn caller_for<'a>(
    service: &str,
    ctx: &'a RequestContext,
    mask: AttachmentsMask,
) -> Result<Option<&'a InstanceId>> {
    if mask.requires_instance_id() {
        ctx.require_instance_id(service).map(Some)
    } else {
        Ok(ctx.instance_id(service))
    }
}

fn list_volumes(
    service: &str,
    driver: &dyn StorageDriver,
    ctx: &RequestContext,
    mask: AttachmentsMask,
    filter: Option<&Filter>,
) -> Result<VolumeMap> {
    let caller = caller_for(service, ctx, mask)?;
    let volumes = driver.volumes(ctx, &VolumesOpts { attachments: mask })?;
    let mut selected = VolumeMap::new();
    for mut volume in volumes {
        if !attachments::resolve(&mut volume, caller, mask) {
            continue;
        }
        if filter.is_some_and(|f| !f.matches(&volume)) {
            continue;
        }
        selected.insert(volume.id.clone(), volume);
    }
    Ok(selected)
}

fn list_snapshots(
    driver: &dyn StorageDriver,
    ctx: &RequestContext,
    filter: Option<&Filter>,
) -> Result<SnapshotMap> {
    Ok(driver
        .snapshots(ctx)?
        .into_iter()
        .filter(|s| filter.is_none_or(|f| f.matches(s)))
        .map(|s| (s.id.clone(), s))
        .collect())
}

fn inspect_by_name(
    driver: &dyn StorageDriver,
    ctx: &RequestContext,
    name: &str,
    opts: &VolumeInspectOpts,
) -> Result<Volume> {
    match driver.volume_inspect_by_name(ctx, name, opts) {
        Err(Error::NotImplemented { .. }) => {
            tracing::debug!(driver = driver.name(), volume = name, "inspecting by listing");
            driver
                .volumes(ctx, &VolumesOpts { attachments: opts.attachments })?
                .into_iter()
                .find(|v| v.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::not_found("volume", name))
        },
        other => other,
    }
}

/// Detaches every volume attached to the caller's instance on one service.
fn detach_all(
    service: &str,
    driver: &dyn StorageDriver,
    ctx: &RequestContext,
    opts: VolumeDetachOpts,
) -> Result<VolumeMap> {
    let instance = ctx.require_instance_id(service)?;
    let mask = AttachmentsMask::ATTACHED_TO_INSTANCE;
    let mut detached = VolumeMap::new();
    for mut volume in driver.volumes(ctx, &VolumesOpts { attachments: mask })? {
        if !attachments::resolve(&mut volume, Some(instance), mask) {
            continue;
        }
        let volume = driver.volume_detach(ctx, &volume.id, instance, &opts)?;
        tracing::info!(service, volume = %volume.id, "detached volume");
        detached.insert(
            volume.id.clone(),
            default_state(volume, VolumeAttachmentState::Available),
        );
    }
    Ok(detached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{MockDriver, MockOptions};
    use crate::task::RegistryConfig;
    use crate::types::{Snapshot, TaskState, VolumeAttachment};
    use pretty_assertions::assert_eq;

    fn orchestrator(drivers: Vec<(&str, MockDriver)>) -> Orchestrator {
        let tasks = TaskRegistry::new();
        let mut services = ServiceRegistry::new();
        for (name, driver) in drivers {
            services.insert(StorageService::new(name, Arc::new(driver), tasks.clone(), 1));
        }
        Orchestrator::new(tasks, services).unwrap()
    }

    fn seeded(volumes: Vec<Volume>) -> MockDriver {
        MockDriver::with_options(
            "local",
            MockOptions {
                volumes,
                ..MockOptions::default()
            },
        )
    }

    fn attached_to(id: &str, name: &str, instance: &str) -> Volume {
        let mut volume = Volume::new(id, name);
        volume.attachments.push(VolumeAttachment {
            volume_id: id.to_string(),
            instance_id: Some(InstanceId::new("mock", instance)),
            ..VolumeAttachment::default()
        });
        volume
    }

    #[tokio::test]
    async fn bad_filter_fails_before_queueing() {
        let orch = orchestrator(vec![("local", MockDriver::new("local"))]);
        let err = orch
            .volumes(&RequestContext::new(), AttachmentsMask::NONE, Some("name=foo"))
            .unwrap_err();
        assert!(matches!(err, Error::BadFilter { ref filter, .. } if filter == "name=foo"));
        assert!(orch.tasks().is_empty());
    }

    #[tokio::test]
    async fn single_service_instance_id_checked_upfront() {
        let orch = orchestrator(vec![("local", MockDriver::new("local"))]);
        let err = orch
            .volume_attach(
                &RequestContext::new(),
                "local",
                "vol-1",
                VolumeAttachOpts::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MissingInstanceId { ref service } if service == "local"));
        assert!(orch.tasks().is_empty());
    }

    #[tokio::test]
    async fn inspect_by_name_falls_back_to_listing() {
        let orch = orchestrator(vec![(
            "local",
            seeded(vec![Volume::new("vol-1", "Data"), Volume::new("vol-2", "logs")]),
        )]);
        let ctx = RequestContext::new();
        let task = orch
            .volume_inspect(&ctx, "local", "data", true, AttachmentsMask::NONE)
            .unwrap();
        let done = orch.tasks().wait(task.id).await.unwrap();
        assert_eq!(done.state, TaskState::Success);
        assert_eq!(done.result.unwrap()["id"], "vol-1");
    }

    #[tokio::test]
    async fn inspect_reports_excluded_volume_as_not_found() {
        let orch = orchestrator(vec![(
            "local",
            seeded(vec![attached_to("vol-1", "data", "i-other")]),
        )]);
        let ctx = RequestContext::new().with_instance_id("local", InstanceId::new("mock", "i-1"));
        let task = orch
            .volume_inspect(&ctx, "local", "vol-1", false, AttachmentsMask::ONLY_UNATTACHED)
            .unwrap();
        let done = orch.tasks().wait(task.id).await.unwrap();
        assert!(matches!(
            done.error,
            Some(Error::NotFound { kind: "volume", .. })
        ));
    }

    #[tokio::test]
    async fn filter_sees_resolved_attachment_state() {
        let orch = orchestrator(vec![(
            "local",
            seeded(vec![
                attached_to("vol-1", "mine", "I-1"),
                attached_to("vol-2", "theirs", "i-2"),
                Volume::new("vol-3", "free"),
            ]),
        )]);
        let ctx = RequestContext::new().with_instance_id("local", InstanceId::new("mock", "i-1"));
        let task = orch
            .volumes_for_service(
                &ctx,
                "LOCAL",
                AttachmentsMask::FOR_INSTANCE,
                Some("(attachmentState=attached)"),
            )
            .unwrap();
        let done = orch.tasks().wait(task.id).await.unwrap();
        let result = done.result.unwrap();
        let ids: Vec<&String> = result.as_object().unwrap().keys().collect();
        assert_eq!(ids, vec!["vol-1"]);
    }

    #[tokio::test]
    async fn created_volumes_default_to_available() {
        let orch = orchestrator(vec![("local", MockDriver::new("local"))]);
        let ctx = RequestContext::new();
        let task = orch
            .volume_create(&ctx, "local", "data", VolumeCreateOpts::default())
            .unwrap();
        let done = orch.tasks().wait(task.id).await.unwrap();
        assert_eq!(done.result.unwrap()["attachmentState"], "available");
    }

    #[tokio::test]
    async fn attach_then_detach_all() {
        let orch = orchestrator(vec![(
            "local",
            seeded(vec![Volume::new("vol-1", "data"), Volume::new("vol-2", "logs")]),
        )]);
        let ctx = RequestContext::new().with_instance_id("local", InstanceId::new("mock", "i-1"));

        let task = orch
            .volume_attach(&ctx, "local", "vol-1", VolumeAttachOpts::default())
            .unwrap();
        let attached = orch.tasks().wait(task.id).await.unwrap();
        let response = attached.result.unwrap();
        assert_eq!(response["volume"]["attachmentState"], "attached");
        assert!(response["attachToken"].is_string());

        let task = orch.volume_detach_all(&ctx, VolumeDetachOpts::default());
        let done = orch.tasks().wait(task.id).await.unwrap();
        let result = done.result.unwrap();
        let detached: Vec<&String> = result["local"].as_object().unwrap().keys().collect();
        assert_eq!(detached, vec!["vol-1"]);
    }

    #[tokio::test]
    async fn snapshots_merge_by_service() {
        let snapshot = |id: &str| Snapshot {
            id: id.to_string(),
            ..Snapshot::default()
        };
        let a = MockDriver::new("a");
        a.insert_snapshot(snapshot("snap-a"));
        let b = MockDriver::new("b");
        b.insert_snapshot(snapshot("snap-b"));
        let orch = orchestrator(vec![("a", a), ("b", b)]);

        let task = orch.snapshots(&RequestContext::new(), None).unwrap();
        let done = orch.tasks().wait(task.id).await.unwrap();
        let result = done.result.unwrap();
        assert!(result["a"]["snap-a"].is_object());
        assert!(result["b"]["snap-b"].is_object());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn merge_keeps_partials_evicted_before_the_coordinator_runs() {
        let tasks = TaskRegistry::with_config(RegistryConfig {
            retention: Some(std::time::Duration::ZERO),
            ..RegistryConfig::default()
        });
        let mut services = ServiceRegistry::new();
        for name in ["a", "b", "c"] {
            let driver = seeded(vec![Volume::new(format!("vol-{name}"), name)]);
            services.insert(StorageService::new(name, Arc::new(driver), tasks.clone(), 1));
        }
        let orch = Orchestrator::new(tasks, services).unwrap();

        for _ in 0..20 {
            let task = orch
                .volumes(&RequestContext::new(), AttachmentsMask::NONE, None)
                .unwrap();
            let done = orch.tasks().wait(task.id).await.unwrap();
            assert_eq!(done.state, TaskState::Success);
            let result = done.result.unwrap();
            let keys: Vec<&String> = result.as_object().unwrap().keys().collect();
            assert_eq!(keys, vec!["a", "b", "c"]);
            assert_eq!(result["b"]["vol-b"]["name"], "b");
        }
    }

    #[tokio::test]
    async fn no_services_merge_to_empty_object() {
        let orch = orchestrator(vec![]);
        let task = orch
            .volumes(&RequestContext::new(), AttachmentsMask::NONE, None)
            .unwrap();
        let done = orch.tasks().wait(task.id).await.unwrap();
        assert_eq!(done.result, Some(serde_json::json!({})));
    }

    #[tokio::test]
    async fn unknown_service() {
        let orch = orchestrator(vec![]);
        assert!(matches!(
            orch.service_inspect("ebs"),
            Err(Error::UnknownService { .. })
        ));
    }
}
