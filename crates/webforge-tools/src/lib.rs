pub mod check_tools;
pub mod registry;
pub mod repo_tools;

pub use check_tools::CheckTools;
pub use registry::{SnapshotBackend, Tool, ToolRegistry};
pub use repo_tools::{ApplyPatchResult, RepoTools, RepoToolError};
