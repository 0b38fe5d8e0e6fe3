//! Sync seam for pushing run artifacts to a remote data/website bucket.
//! `GCS_DATA_BUCKET`/`GCS_WEBSITE_BUCKET` select a bucket name but no
//! cloud SDK is wired in here; shell orchestration and cloud sync are out
//! of scope. `NoopRemoteSync` satisfies the trait whenever no bucket is
//! configured.

use async_trait::async_trait;

#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn sync_up(&self, local_dir: &str) -> anyhow::Result<()>;
    async fn sync_down(&self, local_dir: &str) -> anyhow::Result<()>;
}

pub struct NoopRemoteSync;

#[async_trait]
impl RemoteSync for NoopRemoteSync {
    async fn sync_up(&self, _local_dir: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn sync_down(&self, _local_dir: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Resolve the configured sync backend from environment. Since no bucket
/// client is implemented, any configured bucket name still resolves to
/// the no-op backend, but is logged so the gap is visible rather than silent.
pub fn resolve() -> Box<dyn RemoteSync> {
    if let Ok(bucket) = std::env::var("GCS_DATA_BUCKET") {
        tracing::warn!(bucket, "GCS_DATA_BUCKET set but no cloud sync backend is wired in; skipping sync");
    }
    if let Ok(bucket) = std::env::var("GCS_WEBSITE_BUCKET") {
        tracing::warn!(bucket, "GCS_WEBSITE_BUCKET set but no cloud sync backend is wired in; skipping sync");
    }
    Box::new(NoopRemoteSync)
}
