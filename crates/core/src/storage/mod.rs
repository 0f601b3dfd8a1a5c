pub mod snapshots;

pub use snapshots::{FileSnapshotStore, SnapshotStore, StagedSnapshot};
