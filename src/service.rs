//! Storage services.
//!
//! A [`StorageService`] is one configured backend: a name, a driver and the
//! [`BackendQueue`] that serializes calls into that driver.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::driver::{DriverRegistry, StorageDriver};
use crate::error::{Error, Result};
use crate::schema::ResultSchema;
use crate::task::registry::TaskEntry;
use crate::task::{self, BackendQueue, TaskRegistry};
use crate::types::{DriverInfo, ServiceInfo, Task};

/// One storage backend and its execution queue.
pub struct StorageService {
    name: String,
    driver: Arc<dyn StorageDriver>,
    queue: BackendQueue,
    registry: TaskRegistry,
}

impl StorageService {
    /// Creates a service and starts its queue consumer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        name: &str,
        driver: Arc<dyn StorageDriver>,
        registry: TaskRegistry,
        workers: usize,
    ) -> Self {
        let name = name.to_ascii_lowercase();
        Self {
            queue: BackendQueue::new(&name, workers),
            name,
            driver,
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            driver: DriverInfo {
                name: self.driver.name().to_string(),
                storage_type: self.driver.storage_type(),
            },
        }
    }

    /// Tracks a task and queues `run` behind every earlier job of this
    /// service.
    ///
    /// `run` executes on the blocking pool with the service's driver and a
    /// copy of `ctx`. Its output is serialized to JSON as the task result.
    pub fn enqueue<T, F>(
        &self,
        ctx: &RequestContext,
        name: &str,
        schema: Option<ResultSchema>,
        run: F,
    ) -> Task
    where
        T: Serialize,
        F: FnOnce(&dyn StorageDriver, &RequestContext) -> Result<T> + Send + 'static,
    {
        self.enqueue_entry(ctx, name, schema, run).0
    }

    /// Like [`enqueue`](Self::enqueue) but also hands back the registry
    /// entry, which stays waitable after the registry evicts it.
    pub(crate) fn enqueue_entry<T, F>(
        &self,
        ctx: &RequestContext,
        name: &str,
        schema: Option<ResultSchema>,
        run: F,
    ) -> (Task, Arc<TaskEntry>)
    where
        T: Serialize,
        F: FnOnce(&dyn StorageDriver, &RequestContext) -> Result<T> + Send + 'static,
    {
        let entry = self.registry.track_entry(ctx, name, schema.as_ref());
        let task = entry.snapshot();
        let id = task.id;

        let driver = Arc::clone(&self.driver);
        let call_ctx = ctx.clone();
        let blocking = async move {
            tokio::task::spawn_blocking(move || {
                let value = run(driver.as_ref(), &call_ctx)?;
                serde_json::to_value(value).map_err(|e| {
                    Error::backend(driver.name(), format!("unserializable result: {e}"))
                })
            })
            .await
            .map_err(|e| match e.try_into_panic() {
                Ok(payload) => task::panicked(id, payload),
                Err(e) => Error::backend("runtime", e.to_string()),
            })?
        };

        let registry = self.registry.clone();
        let job_entry = Arc::clone(&entry);
        let span = tracing::info_span!(
            "task",
            id,
            service = %self.name,
            request = %ctx.request_id()
        );
        let job = Box::pin(
            async move { registry.run_entry(job_entry, schema, blocking).await }.instrument(span),
        );

        if self.queue.push(job).is_err() {
            tracing::error!(task = id, service = %self.name, "backend queue closed");
            self.registry.abort_entry(
                &entry,
                Error::backend(self.driver.name(), "backend queue closed"),
            );
        }
        (task, entry)
    }
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("name", &self.name)
            .field("driver", &self.driver.name())
            .field("workers", &self.queue.workers())
            .finish()
    }
}

/// Configured services by lower-cased name, iterated in name order.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<StorageService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every service in `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(
        config: &ServerConfig,
        drivers: &DriverRegistry,
        registry: &TaskRegistry,
    ) -> Result<Self> {
        let mut services = Self::new();
        for (name, service) in &config.services {
            let driver_name = service.driver_name(name);
            let driver = drivers.build(driver_name, name, service)?;
            tracing::info!(service = %name, driver = driver_name, "configured storage service");
            services.insert(StorageService::new(
                name,
                driver,
                registry.clone(),
                config.workers_for(service),
            ));
        }
        Ok(services)
    }

    pub fn insert(&mut self, service: StorageService) {
        self.services
            .insert(service.name().to_string(), Arc::new(service));
    }

    /// Looks up a service by name, ignoring case.
    pub fn get(&self, name: &str) -> Result<Arc<StorageService>> {
        self.services
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnknownService {
                name: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<StorageService>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MockDriver;
    use crate::types::{TaskState, VolumesOpts};

    #[tokio::test]
    async fn lookups_ignore_case() {
        let tasks = TaskRegistry::new();
        let mut services = ServiceRegistry::new();
        services.insert(StorageService::new(
            "Local",
            Arc::new(MockDriver::new("local")),
            tasks,
            1,
        ));
        assert_eq!(services.get("LOCAL").unwrap().name(), "local");
        assert!(matches!(
            services.get("ebs"),
            Err(Error::UnknownService { .. })
        ));
    }

    #[tokio::test]
    async fn blocking_panic_becomes_task_error() {
        let tasks = TaskRegistry::new();
        let driver = Arc::new(MockDriver::new("local"));
        let service = StorageService::new("local", driver, tasks.clone(), 1);
        let ctx = RequestContext::new();
        let task = service.enqueue(&ctx, "boom", None, |_driver, _ctx| -> Result<()> {
            panic!("driver exploded")
        });
        let done = tasks.wait(task.id).await.unwrap();
        assert_eq!(done.state, TaskState::Error);
        assert!(matches!(
            done.error,
            Some(Error::TaskPanicked { ref message, .. }) if message == "driver exploded"
        ));
    }

    #[tokio::test]
    async fn driver_results_are_serialized() {
        let tasks = TaskRegistry::new();
        let driver = Arc::new(MockDriver::new("local"));
        let service = StorageService::new("local", driver, tasks.clone(), 1);
        let ctx = RequestContext::new();
        let task = service.enqueue(&ctx, "volumes", None, |driver, ctx| {
            driver.volumes(ctx, &VolumesOpts::default())
        });
        let done = tasks.wait(task.id).await.unwrap();
        assert_eq!(done.result, Some(serde_json::json!([])));
    }
}
