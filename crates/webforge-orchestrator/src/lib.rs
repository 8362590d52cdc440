pub mod links;
pub mod pages;
pub mod plan;
pub mod session;
pub mod sse;
pub mod stream;

pub use links::validate_links;
pub use pages::{InMemoryProjectPageStore, ProjectPageStore};
pub use plan::{expand_build_plan, BuildPlanStore, InMemoryBuildPlanStore, PlanStoreError};
pub use session::SessionRegistry;
pub use sse::{done_frame, render_frame};
pub use stream::{MultiPageOrchestrator, ThumbnailEnqueuer, VersionRecorder};
