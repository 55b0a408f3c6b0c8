use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use tokio::{task::JoinHandle, time};
use tracing::debug;

use crate::{job_store::JobStore, search_cache::SearchCache};

/// Periodically drops jobs older than `retention`. The first sweep runs
/// immediately.
pub fn spawn_job_sweeper(
    jobs: Arc<JobStore>,
    every: Duration,
    retention: ChronoDuration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            let removed = jobs.purge_older_than(retention).await;
            debug!(removed, "Job sweep finished");
        }
    })
}

/// Periodically drops expired search results, flushing when any were removed.
pub fn spawn_cache_sweeper(cache: Arc<SearchCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            let removed = cache.purge_expired().await;
            debug!(removed, "Search cache sweep finished");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        job_store::JobStoreSettings,
        models::{Job, PlaylistSummary},
        persist::job_file_path,
    };

    #[tokio::test]
    async fn job_sweeper_purges_aged_jobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = JobStoreSettings {
            root: dir.path().join("jobs"),
            max_tracks: 10,
            persist_every: 10,
        };
        let playlist = PlaylistSummary {
            id: "p".to_string(),
            name: "Old".to_string(),
            image: None,
        };

        let writer = JobStore::open(settings.clone()).await.unwrap();
        let job = writer.create("s", playlist, Vec::new()).await.unwrap();
        let path = job_file_path(&settings.root, &job.id);
        let mut aged: Job = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        aged.created_at = chrono::Utc::now() - ChronoDuration::days(8);
        tokio::fs::write(&path, serde_json::to_vec(&aged).unwrap())
            .await
            .unwrap();

        let jobs = Arc::new(JobStore::open(settings).await.unwrap());
        let handle = spawn_job_sweeper(
            Arc::clone(&jobs),
            Duration::from_millis(10),
            ChronoDuration::days(7),
        );
        time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(jobs.get(&job.id).await.is_none());
        assert!(!path.exists());
    }
}
