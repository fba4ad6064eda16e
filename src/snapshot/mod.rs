//! Stop-location database snapshots: storage, rebuild and scheduling.

pub mod builder;
pub mod scheduler;
pub mod store;

pub use builder::SnapshotBuilder;
pub use scheduler::{RebuildScheduler, SchedulerHandle};
pub use store::{SnapshotBuild, SnapshotPaths, SnapshotStore};
