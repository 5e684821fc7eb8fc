//! # volplane
//!
//! Core of a storage control plane: one API in front of many storage
//! backends.
//!
//! # Overview
//!
//! Every request becomes a [`Task`]. Work for one backend runs on that
//! backend's queue so calls into a driver never overlap. Work for all
//! backends fans out into one task per backend plus a coordinating task
//! that merges the partial results.
//!
//! # Module Organization
//!
//! - [`task`] - task registry, completion signals and per-backend queues
//! - [`orchestrator`] - single-service operations and multi-service fan-out
//! - [`attachments`] - attachment masks and the attachment state resolver
//! - [`filter`] - the filter expression compiler and evaluator
//! - [`driver`] / [`drivers`] - the storage driver contract and the built-in
//!   in-memory driver
//! - [`config`] - TOML and environment configuration
//! - `http` - the HTTP boundary (feature `http-server`)
//!
//! # Example
//!
//! ```
//! use volplane::{
//!     AttachmentsMask, DriverRegistry, Orchestrator, RequestContext, ServerConfig, ServiceConfig,
//!     TaskState,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> volplane::Result<()> {
//! let mut config = ServerConfig::default();
//! config
//!     .services
//!     .insert("local".to_string(), ServiceConfig::with_driver("mock"));
//!
//! let orchestrator = Orchestrator::from_config(&config, &DriverRegistry::with_builtin())?;
//! let ctx = RequestContext::new();
//! let task = orchestrator.volumes(&ctx, AttachmentsMask::NONE, Some("(name=data*)"))?;
//!
//! let done = orchestrator.tasks().wait(task.id).await?;
//! assert_eq!(done.state, TaskState::Success);
//! # Ok(())
//! # }
//! ```

pub mod attachments;
pub mod config;
pub mod context;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod filter;
pub mod orchestrator;
pub mod schema;
pub mod service;
pub mod task;
pub mod types;

#[cfg(feature = "http-server")]
pub mod http;

#[cfg(feature = "logging")]
pub mod logging;

// Re-exports for ergonomic access
pub use attachments::{resolve, AttachmentsMask};
pub use config::{ServerConfig, ServiceConfig};
pub use context::RequestContext;
pub use driver::{DriverRegistry, StorageDriver};
pub use error::{Error, Result};
pub use filter::{compile, Filter, FilterError, Filterable};
pub use orchestrator::Orchestrator;
pub use schema::{ResultSchema, Schemas};
pub use service::{ServiceRegistry, StorageService};
pub use task::{BackendQueue, CompletionSignal, RegistryConfig, TaskRegistry};
pub use types::{
    DriverInfo, InstanceId, LocalDevices, ServiceInfo, ServiceSnapshotMap, ServiceVolumeMap,
    Snapshot, SnapshotMap, StorageType, Task, TaskId, TaskState, Volume, VolumeAttachOpts,
    VolumeAttachResponse, VolumeAttachment, VolumeAttachmentState, VolumeCreateOpts,
    VolumeDetachOpts, VolumeInspectOpts, VolumeMap, VolumeRemoveOpts, VolumesOpts,
};
