//! Data model shared by drivers, the scheduler and the HTTP boundary.

pub mod service;
pub mod snapshot;
pub mod task;
pub mod volume;

pub use service::{
    DriverInfo, ServiceInfo, StorageType, VolumeAttachOpts, VolumeAttachResponse,
    VolumeCreateOpts, VolumeDetachOpts, VolumeInspectOpts, VolumeRemoveOpts, VolumesOpts,
};
pub use snapshot::{ServiceSnapshotMap, Snapshot, SnapshotMap};
pub use task::{Task, TaskId, TaskState};
pub use volume::{
    InstanceId, LocalDevices, ServiceVolumeMap, Volume, VolumeAttachment, VolumeAttachmentState,
    VolumeMap,
};
