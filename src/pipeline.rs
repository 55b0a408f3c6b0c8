use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing::{error, info, warn};

use crate::{
    catalog::{PlaylistWriter, TrackSearcher},
    error::MigrateError,
    job_store::JobStore,
    matching,
    models::{Job, JobStatus, TransferReport},
    progress::{ProgressEvent, ProgressHub},
    search_cache::SearchCache,
    transfer,
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Pause between consecutive searches.
    pub search_delay: Duration,
    /// Pause after every playlist insert.
    pub transfer_delay: Duration,
}

/// Shared state the matching and transfer runs operate on.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub jobs: Arc<JobStore>,
    pub cache: Arc<SearchCache>,
    pub progress: Arc<ProgressHub>,
    pub settings: PipelineSettings,
    running: Arc<Mutex<HashSet<String>>>,
}

/// Marks a job as having a run in flight until dropped.
#[derive(Debug)]
pub struct RunGuard {
    job_id: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.job_id);
    }
}

impl Pipeline {
    pub fn new(
        jobs: Arc<JobStore>,
        cache: Arc<SearchCache>,
        progress: Arc<ProgressHub>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            jobs,
            cache,
            progress,
            settings,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claims `job_id` for a single matching or transfer pass.
    pub fn claim(&self, job_id: &str) -> Result<RunGuard, MigrateError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(job_id.to_string()) {
            return Err(MigrateError::JobBusy(job_id.to_string()));
        }
        Ok(RunGuard {
            job_id: job_id.to_string(),
            running: Arc::clone(&self.running),
        })
    }

    /// Spawns a matching run for an existing job and returns immediately.
    pub async fn start_analysis(
        &self,
        job_id: &str,
        searcher: Arc<dyn TrackSearcher>,
    ) -> Result<Job, MigrateError> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .ok_or_else(|| MigrateError::JobNotFound(job_id.to_string()))?;
        let guard = self.claim(job_id)?;

        let pipeline = self.clone();
        let job_id = job.id.clone();
        let session_id = job.session_id.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match matching::run_analysis(&pipeline, &job_id, searcher.as_ref()).await {
                Ok(stats) => info!(
                    job_id = %job_id,
                    found = stats.found,
                    not_found = stats.not_found,
                    "Analysis finished"
                ),
                Err(err) => {
                    error!(job_id = %job_id, "Analysis failed: {err}");
                    pipeline.fail_analysis(&job_id, &session_id, &err).await;
                }
            }
        });

        Ok(job)
    }

    async fn fail_analysis(&self, job_id: &str, session_id: &str, err: &MigrateError) {
        let message = err.to_string();
        if let Err(status_err) = self
            .jobs
            .set_status(job_id, JobStatus::Error, Some(message.clone()))
            .await
        {
            warn!(job_id, "Could not record analysis failure: {status_err}");
        }
        self.progress
            .publish(
                session_id,
                ProgressEvent::AnalysisError {
                    job_id: job_id.to_string(),
                    message,
                },
            )
            .await;
    }

    /// Runs a transfer on its own task and waits for the report. Dropping
    /// the returned future stops the wait, not the transfer.
    pub async fn transfer(
        &self,
        job_id: &str,
        session_id: &str,
        writer: Arc<dyn PlaylistWriter>,
    ) -> Result<TransferReport, MigrateError> {
        let guard = self.claim(job_id)?;

        let pipeline = self.clone();
        let job_id = job_id.to_string();
        let session_id = session_id.to_string();
        let run = tokio::spawn(async move {
            let _guard = guard;
            transfer::run_transfer(&pipeline, &job_id, &session_id, writer.as_ref()).await
        });

        run.await.map_err(|err| {
            MigrateError::Internal(anyhow::Error::new(err).context("Transfer task failed"))
        })?
    }
}
