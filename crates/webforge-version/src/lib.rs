pub mod diffing;
pub mod recorder;
pub mod snapshot_backend;
pub mod store;

pub use diffing::{apply_unified_diff, compute_change_summary, page_file_map, unified_diff_text};
pub use recorder::BuildVersionRecorder;
pub use snapshot_backend::VersionSnapshotBackend;
pub use store::{PageWriter, VersionError, VersionStore, FULL_SNAPSHOT_WINDOW, MAX_BRANCHES, MAX_PINNED_VERSIONS};
