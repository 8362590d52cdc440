//! Headless rendering is an external dependency the crate only consumes
//! through a trait — no production browser driver ships here, matching the
//! teacher's narrow-trait-at-the-seam pattern for provider integrations.

use async_trait::async_trait;

pub const THUMBNAIL_VIEWPORT: (u32, u32) = (375, 667);
pub const THUMBNAIL_SIZE: (u32, u32) = (300, 600);
pub const OG_VIEWPORT: (u32, u32) = (1200, 630);
pub const OG_SIZE: (u32, u32) = (1200, 630);

#[async_trait]
pub trait HeadlessCapture: Send + Sync {
    /// Renders `html` at `viewport`, resizes the screenshot to `size`, and
    /// returns PNG bytes. Implementations own their own settle/network-idle
    /// waiting internally.
    async fn capture(&self, html: &str, viewport: (u32, u32), size: (u32, u32)) -> anyhow::Result<Vec<u8>>;
}
