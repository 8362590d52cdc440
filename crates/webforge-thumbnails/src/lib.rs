pub mod capture;
pub mod enqueuer;
pub mod placeholder;
pub mod queue;
pub mod storage;

pub use capture::{HeadlessCapture, OG_SIZE, OG_VIEWPORT, THUMBNAIL_SIZE, THUMBNAIL_VIEWPORT};
pub use enqueuer::{PageContent, PageContentSource, QueueThumbnailEnqueuer};
pub use placeholder::svg_placeholder;
pub use queue::{ThumbnailError, ThumbnailQueue, BACKOFF_SECONDS, CAPTURE_TIMEOUT, MAX_CONCURRENT};
pub use storage::BlobStore;
