//! Task scheduling.
//!
//! - [`TaskRegistry`] - creation, execution, inspection and waiting
//! - [`BackendQueue`] - per-backend serialization of driver calls
//! - [`CompletionSignal`] - the one-shot latch behind every wait

mod exec;
pub mod queue;
pub mod registry;
pub mod signal;

pub(crate) use exec::panicked;
pub use queue::{BackendQueue, DEFAULT_BACKEND_WORKERS};
pub use registry::{RegistryConfig, TaskRegistry, DEFAULT_TASK_RETENTION};
pub use signal::CompletionSignal;
