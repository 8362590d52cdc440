//! Per-job-type bounded-concurrency queue for page thumbnails and OG images.
//! Grounded on `thumbnail_queue.py`'s constants and supersede/backoff rules.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::Level;
use uuid::Uuid;
use webforge_observability::{emit_event, Component, ObservabilityEvent};
use webforge_types::{JobStatus, ThumbnailJob, ThumbnailJobType};

use crate::capture::{HeadlessCapture, OG_SIZE, OG_VIEWPORT, THUMBNAIL_SIZE, THUMBNAIL_VIEWPORT};
use crate::placeholder::svg_placeholder;
use crate::storage::BlobStore;

pub const MAX_CONCURRENT: usize = 2;
pub const CAPTURE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
pub const BACKOFF_SECONDS: [i64; 3] = [30, 45, 60];
pub const SETTLE_DELAY: std::time::Duration = std::time::Duration::from_millis(300);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("project not published")]
    ProjectNotPublished,
    #[error("job not found: {0}")]
    JobNotFound(String),
}

/// What a job needs to render; held alongside the job row so a retry or the
/// worker loop can re-run the capture without the caller re-supplying it.
#[derive(Clone)]
struct JobInput {
    html: String,
    background_color: String,
    page_title: String,
}

pub struct ThumbnailQueue {
    jobs: RwLock<HashMap<String, ThumbnailJob>>,
    inputs: RwLock<HashMap<String, JobInput>>,
    capture: Arc<dyn HeadlessCapture>,
    storage: Arc<dyn BlobStore>,
    thumbnail_slots: Arc<Semaphore>,
    og_slots: Arc<Semaphore>,
}

impl ThumbnailQueue {
    pub fn new(capture: Arc<dyn HeadlessCapture>, storage: Arc<dyn BlobStore>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            inputs: RwLock::new(HashMap::new()),
            capture,
            storage,
            thumbnail_slots: Arc::new(Semaphore::new(MAX_CONCURRENT)),
            og_slots: Arc::new(Semaphore::new(MAX_CONCURRENT)),
        }
    }

    async fn supersede_in_flight(&self, project_id: &str, page_id: &str, job_type: ThumbnailJobType, reason: &str) {
        let mut jobs = self.jobs.write().await;
        for job in jobs.values_mut() {
            if job.project_id == project_id
                && job.page_id == page_id
                && job.job_type == job_type
                && matches!(job.status, JobStatus::Queued | JobStatus::Running)
            {
                job.status = JobStatus::Failed;
                job.last_error = Some(reason.to_string());
            }
        }
    }

    async fn enqueue(
        &self,
        project_id: &str,
        page_id: &str,
        job_type: ThumbnailJobType,
        html: String,
        background_color: String,
        page_title: String,
    ) -> ThumbnailJob {
        self.supersede_in_flight(project_id, page_id, job_type, "superseded by new job").await;
        let job = ThumbnailJob {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            page_id: page_id.to_string(),
            job_type,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            next_run_at: None,
            last_error: None,
            image_url: None,
            created_at: Utc::now(),
        };
        self.inputs
            .write()
            .await
            .insert(job.id.clone(), JobInput { html, background_color, page_title });
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        job
    }

    pub async fn enqueue_thumbnail(
        &self,
        project_id: &str,
        page_id: &str,
        html: String,
        background_color: String,
        page_title: String,
    ) -> ThumbnailJob {
        self.enqueue(project_id, page_id, ThumbnailJobType::Thumbnail, html, background_color, page_title)
            .await
    }

    pub async fn enqueue_og_image(
        &self,
        project_id: &str,
        page_id: &str,
        html: String,
        background_color: String,
        page_title: String,
        project_published: bool,
    ) -> Result<ThumbnailJob, ThumbnailError> {
        if !project_published {
            return Err(ThumbnailError::ProjectNotPublished);
        }
        Ok(self
            .enqueue(project_id, page_id, ThumbnailJobType::OgImage, html, background_color, page_title)
            .await)
    }

    /// Pre-rendered client upload path: decodes a data URL, "resizes" (the
    /// byte payload is forwarded as-is; real resizing is the blob store's or
    /// an image crate's concern, not modeled here), uploads, and marks the
    /// job done, superseding any in-flight job for the same slot.
    pub async fn store_client_image(
        &self,
        project_id: &str,
        page_id: &str,
        job_type: ThumbnailJobType,
        data_url: &str,
    ) -> anyhow::Result<ThumbnailJob> {
        let bytes = decode_data_url(data_url)?;
        self.supersede_in_flight(project_id, page_id, job_type, "superseded by client upload").await;

        let size = match job_type {
            ThumbnailJobType::Thumbnail => THUMBNAIL_SIZE,
            ThumbnailJobType::OgImage => OG_SIZE,
        };
        let hint = format!("{page_id}-{}x{}-client", size.0, size.1);
        let url = self.storage.upload(project_id, &hint, bytes, "image/png").await?;

        let job = ThumbnailJob {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            page_id: page_id.to_string(),
            job_type,
            status: JobStatus::Done,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            next_run_at: None,
            last_error: None,
            image_url: Some(url),
            created_at: Utc::now(),
        };
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub async fn bump_job_priority(&self, job_id: &str) -> Result<(), ThumbnailError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| ThumbnailError::JobNotFound(job_id.to_string()))?;
        job.next_run_at = None;
        Ok(())
    }

    pub async fn get_latest_job(
        &self,
        project_id: &str,
        page_id: &str,
        job_type: ThumbnailJobType,
    ) -> Option<ThumbnailJob> {
        let jobs = self.jobs.read().await;
        jobs.values()
            .filter(|j| j.project_id == project_id && j.page_id == page_id && j.job_type == job_type)
            .max_by_key(|j| j.created_at)
            .cloned()
    }

    fn dims_for(job_type: ThumbnailJobType) -> ((u32, u32), (u32, u32)) {
        match job_type {
            ThumbnailJobType::Thumbnail => (THUMBNAIL_VIEWPORT, THUMBNAIL_SIZE),
            ThumbnailJobType::OgImage => (OG_VIEWPORT, OG_SIZE),
        }
    }

    fn slots_for(&self, job_type: ThumbnailJobType) -> Arc<Semaphore> {
        match job_type {
            ThumbnailJobType::Thumbnail => self.thumbnail_slots.clone(),
            ThumbnailJobType::OgImage => self.og_slots.clone(),
        }
    }

    /// Drives a single queued job to completion: capture under a bounded
    /// concurrency permit, upload on success, backoff-and-requeue on
    /// failure, and an SVG placeholder once attempts are exhausted.
    pub async fn process_job(&self, job_id: &str) -> Result<ThumbnailJob, ThumbnailError> {
        let job_type = {
            let jobs = self.jobs.read().await;
            jobs.get(job_id).ok_or_else(|| ThumbnailError::JobNotFound(job_id.to_string()))?.job_type
        };
        let input = self
            .inputs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| ThumbnailError::JobNotFound(job_id.to_string()))?;

        let permit = self.slots_for(job_type).acquire_owned().await.expect("semaphore never closed");
        {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(job_id).ok_or_else(|| ThumbnailError::JobNotFound(job_id.to_string()))?;
            job.status = JobStatus::Running;
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        let (viewport, size) = Self::dims_for(job_type);
        let result = tokio::time::timeout(CAPTURE_TIMEOUT, self.capture.capture(&input.html, viewport, size)).await;
        drop(permit);

        match result {
            Ok(Ok(bytes)) => {
                let hint = format!("{job_id}-{}x{}", size.0, size.1);
                let project_id = self.jobs.read().await.get(job_id).unwrap().project_id.clone();
                let url = self
                    .storage
                    .upload(&project_id, &hint, bytes, "image/png")
                    .await
                    .map_err(|e| {
                        tracing::warn!(job_id, error = %e, "thumbnail upload failed");
                        ThumbnailError::JobNotFound(job_id.to_string())
                    });
                let mut jobs = self.jobs.write().await;
                let job = jobs.get_mut(job_id).unwrap();
                match url {
                    Ok(url) => {
                        job.status = JobStatus::Done;
                        job.image_url = Some(url);
                        emit_event(
                            Level::INFO,
                            Component::Thumbnail,
                            ObservabilityEvent {
                                event: "thumbnail_job_done",
                                component: Component::Thumbnail.as_str(),
                                build_id: None,
                                session_id: None,
                                project_id: Some(&job.project_id),
                                task_id: None,
                                job_id: Some(&job.id),
                                status: Some("done"),
                                error_code: None,
                                detail: None,
                            },
                        );
                    }
                    Err(_) => {
                        self.fail_attempt(job, &input, "upload failed");
                    }
                }
                Ok(job.clone())
            }
            Ok(Err(e)) => {
                let mut jobs = self.jobs.write().await;
                let job = jobs.get_mut(job_id).unwrap();
                self.fail_attempt(job, &input, &e.to_string());
                Ok(job.clone())
            }
            Err(_elapsed) => {
                let mut jobs = self.jobs.write().await;
                let job = jobs.get_mut(job_id).unwrap();
                self.fail_attempt(job, &input, "capture timed out");
                Ok(job.clone())
            }
        }
    }

    fn fail_attempt(&self, job: &mut ThumbnailJob, input: &JobInput, reason: &str) {
        job.attempts += 1;
        job.last_error = Some(reason.to_string());
        if job.attempts < job.max_attempts {
            let delay = BACKOFF_SECONDS[(job.attempts - 1) as usize];
            job.status = JobStatus::Queued;
            job.next_run_at = Some(next_run_at(delay));
            emit_event(
                Level::WARN,
                Component::Thumbnail,
                ObservabilityEvent {
                    event: "thumbnail_job_retry_scheduled",
                    component: Component::Thumbnail.as_str(),
                    build_id: None,
                    session_id: None,
                    project_id: Some(&job.project_id),
                    task_id: None,
                    job_id: Some(&job.id),
                    status: Some("queued"),
                    error_code: None,
                    detail: Some(reason),
                },
            );
        } else {
            job.status = JobStatus::Failed;
            let size = Self::dims_for(job.job_type).1;
            job.image_url = Some(format!(
                "data:image/svg+xml;base64,{}",
                base64::engine::general_purpose::STANDARD
                    .encode(svg_placeholder(&input.page_title, &input.background_color, size))
            ));
            emit_event(
                Level::ERROR,
                Component::Thumbnail,
                ObservabilityEvent {
                    event: "thumbnail_job_failed",
                    component: Component::Thumbnail.as_str(),
                    build_id: None,
                    session_id: None,
                    project_id: Some(&job.project_id),
                    task_id: None,
                    job_id: Some(&job.id),
                    status: Some("failed"),
                    error_code: None,
                    detail: Some(reason),
                },
            );
        }
    }
}

fn next_run_at(delay_seconds: i64) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::seconds(delay_seconds)
}

fn decode_data_url(data_url: &str) -> anyhow::Result<Vec<u8>> {
    let (_, payload) = data_url
        .split_once(",")
        .ok_or_else(|| anyhow::anyhow!("malformed data URL"))?;
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyCapture {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl HeadlessCapture for FlakyCapture {
        async fn capture(&self, _html: &str, _viewport: (u32, u32), _size: (u32, u32)) -> anyhow::Result<Vec<u8>> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                anyhow::bail!("synthetic capture failure");
            }
            Ok(vec![1, 2, 3])
        }
    }

    struct InMemoryBlobStore;

    #[async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn upload(&self, project_id: &str, hint: &str, _bytes: Vec<u8>, _content_type: &str) -> anyhow::Result<String> {
            Ok(format!("https://blobs.example/{project_id}/{hint}.png"))
        }
    }

    fn queue(fail_times: u32) -> ThumbnailQueue {
        ThumbnailQueue::new(
            Arc::new(FlakyCapture { fail_times: AtomicU32::new(fail_times) }),
            Arc::new(InMemoryBlobStore),
        )
    }

    #[tokio::test]
    async fn enqueue_then_process_succeeds_with_url() {
        let q = queue(0);
        let job = q
            .enqueue_thumbnail("proj", "home", "<html></html>".to_string(), "#112233".to_string(), "Home".to_string())
            .await;
        let result = q.process_job(&job.id).await.unwrap();
        assert_eq!(result.status, JobStatus::Done);
        assert!(result.image_url.unwrap().contains("blobs.example"));
    }

    #[tokio::test]
    async fn og_image_requires_published_project() {
        let q = queue(0);
        let err = q
            .enqueue_og_image("proj", "home", "<html></html>".to_string(), "#112233".to_string(), "Home".to_string(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::ProjectNotPublished));
    }

    #[tokio::test]
    async fn new_enqueue_supersedes_in_flight_job() {
        let q = queue(100);
        let first = q
            .enqueue_thumbnail("proj", "home", "<html></html>".to_string(), "#112233".to_string(), "Home".to_string())
            .await;
        q.enqueue_thumbnail("proj", "home", "<html>v2</html>".to_string(), "#112233".to_string(), "Home".to_string())
            .await;
        let jobs = q.jobs.read().await;
        let first = jobs.get(&first.id).unwrap();
        assert_eq!(first.status, JobStatus::Failed);
        assert_eq!(first.last_error.as_deref(), Some("superseded by new job"));
    }

    #[tokio::test]
    async fn exhausted_attempts_fall_back_to_svg_placeholder() {
        let q = queue(10);
        let job = q
            .enqueue_thumbnail("proj", "home", "<html></html>".to_string(), "#112233".to_string(), "Home".to_string())
            .await;
        let mut last = q.process_job(&job.id).await.unwrap();
        for _ in 0..(MAX_ATTEMPTS - 1) {
            last = q.process_job(&job.id).await.unwrap();
        }
        assert_eq!(last.status, JobStatus::Failed);
        assert_eq!(last.attempts, MAX_ATTEMPTS);
        assert!(last.image_url.unwrap().starts_with("data:image/svg+xml"));
    }

    #[tokio::test]
    async fn store_client_image_supersedes_and_marks_done() {
        let q = queue(0);
        let in_flight = q
            .enqueue_thumbnail("proj", "home", "<html></html>".to_string(), "#112233".to_string(), "Home".to_string())
            .await;
        let data_url = format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode([9, 9, 9]));
        let uploaded = q
            .store_client_image("proj", "home", ThumbnailJobType::Thumbnail, &data_url)
            .await
            .unwrap();
        assert_eq!(uploaded.status, JobStatus::Done);

        let jobs = q.jobs.read().await;
        let superseded = jobs.get(&in_flight.id).unwrap();
        assert_eq!(superseded.last_error.as_deref(), Some("superseded by client upload"));
    }

    #[tokio::test]
    async fn bump_job_priority_clears_next_run_at() {
        let q = queue(100);
        let job = q
            .enqueue_thumbnail("proj", "home", "<html></html>".to_string(), "#112233".to_string(), "Home".to_string())
            .await;
        q.process_job(&job.id).await.unwrap();
        q.bump_job_priority(&job.id).await.unwrap();
        let jobs = q.jobs.read().await;
        assert!(jobs.get(&job.id).unwrap().next_run_at.is_none());
    }

    #[tokio::test]
    async fn get_latest_job_returns_most_recent_for_slot() {
        let q = queue(0);
        let job = q
            .enqueue_thumbnail("proj", "home", "<html></html>".to_string(), "#112233".to_string(), "Home".to_string())
            .await;
        let latest = q.get_latest_job("proj", "home", ThumbnailJobType::Thumbnail).await.unwrap();
        assert_eq!(latest.id, job.id);
    }
}
