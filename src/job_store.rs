use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use tokio::{
    fs,
    sync::{Mutex, RwLock},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::MigrateError,
    models::{
        Job, JobProgress, JobStatus, PlaylistSummary, SourceTrack, TrackMatch, TrackState,
        TrackStatus,
    },
    persist::{delete_file_if_exists, ensure_dir, job_file_path, write_atomic},
};

#[derive(Debug, Clone)]
pub struct JobStoreSettings {
    pub root: PathBuf,
    pub max_tracks: usize,
    /// `record_match` forces a durable write every this many tracks.
    pub persist_every: usize,
}

/// Marks a purged job's file so queued writes never recreate it.
const PURGED: u64 = u64::MAX;

#[derive(Debug)]
struct JobSlot {
    job: Job,
    /// Bumped by every mutation that must reach disk.
    revision: u64,
    /// Serializes writes to this job's file and holds the last revision
    /// written, so an older snapshot never replaces a newer one.
    file: Arc<Mutex<u64>>,
}

impl JobSlot {
    fn new(job: Job) -> Self {
        Self {
            job,
            revision: 0,
            file: Arc::new(Mutex::new(0)),
        }
    }
}

/// Jobs indexed in memory and written through to one JSON file per job.
/// A miss in the index falls back to the job file and warms the index.
///
/// The index lock is never held across a file write; writes to different
/// jobs proceed independently.
#[derive(Debug)]
pub struct JobStore {
    settings: JobStoreSettings,
    jobs: RwLock<HashMap<String, JobSlot>>,
}

impl JobStore {
    pub fn new(settings: JobStoreSettings) -> Self {
        Self {
            settings,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the jobs directory and loads every persisted job.
    pub async fn open(settings: JobStoreSettings) -> Result<Self> {
        ensure_dir(&settings.root).await?;
        let store = Self::new(settings);
        let loaded = store.load_all().await?;
        info!(
            jobs = loaded,
            root = %store.settings.root.display(),
            "Loaded persisted jobs"
        );
        Ok(store)
    }

    async fn load_all(&self) -> Result<usize> {
        let mut dir = fs::read_dir(&self.settings.root)
            .await
            .with_context(|| format!("Failed to list {}", self.settings.root.display()))?;

        let mut loaded = HashMap::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(job_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Some(job) = self.load_from_disk(job_id).await {
                loaded.insert(job.id.clone(), JobSlot::new(job));
            }
        }

        let count = loaded.len();
        self.jobs.write().await.extend(loaded);
        Ok(count)
    }

    async fn load_from_disk(&self, job_id: &str) -> Option<Job> {
        // Only UUIDs are ever issued, which also keeps lookups inside the root.
        Uuid::parse_str(job_id).ok()?;

        let path = job_file_path(&self.settings.root, job_id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(job_id, "Failed to read job file {}: {err}", path.display());
                return None;
            }
        };

        match serde_json::from_slice::<Job>(&raw) {
            Ok(job) => Some(job),
            Err(err) => {
                warn!(job_id, "Failed to parse job file {}: {err}", path.display());
                None
            }
        }
    }

    pub fn max_tracks(&self) -> usize {
        self.settings.max_tracks
    }

    pub async fn create(
        &self,
        session_id: &str,
        playlist: PlaylistSummary,
        tracks: Vec<SourceTrack>,
    ) -> Result<Job, MigrateError> {
        if tracks.len() > self.settings.max_tracks {
            return Err(MigrateError::TooManyTracks {
                count: tracks.len(),
                max: self.settings.max_tracks,
            });
        }

        let job = Job {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            playlist,
            progress: JobProgress {
                current: 0,
                total: tracks.len(),
            },
            tracks: tracks.into_iter().map(TrackState::from_source).collect(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        };

        let encoded = serde_json::to_vec_pretty(&job);
        let mut slot = JobSlot::new(job.clone());
        slot.revision = 1;
        let file = Arc::clone(&slot.file);
        self.jobs.write().await.insert(job.id.clone(), slot);
        self.write_revision(&job.id, &file, 1, encoded).await;

        info!(
            job_id = %job.id,
            session_id,
            tracks = job.tracks.len(),
            "Created job"
        );
        Ok(job)
    }

    pub async fn get(&self, job_id: &str) -> Option<Job> {
        if !self.hydrate(job_id).await {
            return None;
        }
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|slot| slot.job.clone())
    }

    async fn hydrate(&self, job_id: &str) -> bool {
        if self.jobs.read().await.contains_key(job_id) {
            return true;
        }
        if Uuid::parse_str(job_id).is_err() {
            return false;
        }

        // Read under the write lock so a purge in progress cannot be undone
        // by a file read that started before the delete.
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(job_id) {
            return true;
        }
        let Some(job) = self.load_from_disk(job_id).await else {
            return false;
        };
        debug!(job_id, "Hydrated job from disk");
        jobs.insert(job_id.to_string(), JobSlot::new(job));
        true
    }

    /// Jobs owned by a session, newest first.
    pub async fn list_for_session(&self, session_id: &str) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<Job> = jobs
            .values()
            .filter(|slot| slot.job.session_id == session_id)
            .map(|slot| slot.job.clone())
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned
    }

    pub async fn set_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job, MigrateError> {
        self.update(job_id, |job| {
            job.status = status;
            match status {
                JobStatus::Analyzing => {
                    job.progress.current = 0;
                    job.completed_at = None;
                    job.error = None;
                    for track in job.tracks.iter_mut().filter(|t| t.manual_id.is_none()) {
                        track.status = TrackStatus::Pending;
                    }
                }
                JobStatus::Complete | JobStatus::Error => job.completed_at = Some(Utc::now()),
                JobStatus::Pending => {}
            }
            if error.is_some() {
                job.error = error;
            }
            Ok((job.clone(), true))
        })
        .await
    }

    /// Moves a track to `searching` in memory only.
    pub async fn mark_searching(&self, job_id: &str, index: usize) -> Result<(), MigrateError> {
        self.update(job_id, |job| {
            let job_id = job.id.clone();
            let track = job
                .tracks
                .get_mut(index)
                .ok_or(MigrateError::TrackNotFound { job_id, index })?;
            if track.manual_id.is_none() {
                track.status = TrackStatus::Searching;
            }
            Ok(((), false))
        })
        .await
    }

    /// Records a track outcome and advances progress. The job file is only
    /// rewritten every `persist_every` tracks and on the last track, so a
    /// crash can drop up to `persist_every - 1` trailing matches.
    ///
    /// Returns the status the track ends up with: `manual` when an override
    /// is set, otherwise `status`.
    pub async fn record_match(
        &self,
        job_id: &str,
        index: usize,
        matched: Option<TrackMatch>,
        status: TrackStatus,
    ) -> Result<TrackStatus, MigrateError> {
        let persist_every = self.settings.persist_every.max(1);
        self.update(job_id, |job| {
            let job_id = job.id.clone();
            let total = job.tracks.len();
            let track = job
                .tracks
                .get_mut(index)
                .ok_or(MigrateError::TrackNotFound { job_id, index })?;
            track.matched = matched;
            track.status = if track.manual_id.is_some() {
                TrackStatus::Manual
            } else {
                status
            };
            let effective = track.status;
            job.progress.current = job.progress.current.max(index + 1);

            let persist = (index + 1) % persist_every == 0 || index + 1 == total;
            Ok((effective, persist))
        })
        .await
    }

    /// Returns false when the job or track does not exist.
    pub async fn set_manual_override(&self, job_id: &str, index: usize, external_id: &str) -> bool {
        let result = self
            .update(job_id, |job| {
                let job_id = job.id.clone();
                let track = job
                    .tracks
                    .get_mut(index)
                    .ok_or(MigrateError::TrackNotFound { job_id, index })?;
                track.manual_id = Some(external_id.to_string());
                track.status = TrackStatus::Manual;
                Ok(((), true))
            })
            .await;

        match result {
            Ok(()) => {
                info!(job_id, index, external_id, "Applied manual override");
                true
            }
            Err(err) => {
                debug!(job_id, index, "Manual override rejected: {err}");
                false
            }
        }
    }

    /// Drops jobs created more than `max_age` ago, index entry and file.
    pub async fn purge_older_than(&self, max_age: ChronoDuration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut jobs = self.jobs.write().await;
        let expired: Vec<String> = jobs
            .iter()
            .filter(|(_, slot)| slot.job.created_at < cutoff)
            .map(|(job_id, _)| job_id.clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }

        // The index stays locked until the files are gone, so no reader can
        // hydrate a job that is being deleted.
        for job_id in &expired {
            let Some(slot) = jobs.remove(job_id) else {
                continue;
            };
            let mut written = slot.file.lock().await;
            *written = PURGED;
            let path = job_file_path(&self.settings.root, job_id);
            if let Err(err) = delete_file_if_exists(&path).await {
                warn!(job_id = %job_id, "Failed to delete expired job: {err:#}");
            }
        }
        drop(jobs);

        info!(removed = expired.len(), "Purged expired jobs");
        expired.len()
    }

    async fn update<R, F>(&self, job_id: &str, mutate: F) -> Result<R, MigrateError>
    where
        F: FnOnce(&mut Job) -> Result<(R, bool), MigrateError>,
    {
        if !self.hydrate(job_id).await {
            return Err(MigrateError::JobNotFound(job_id.to_string()));
        }

        let mut jobs = self.jobs.write().await;
        let slot = jobs
            .get_mut(job_id)
            .ok_or_else(|| MigrateError::JobNotFound(job_id.to_string()))?;
        let (value, persist) = mutate(&mut slot.job)?;
        if !persist {
            return Ok(value);
        }

        slot.revision += 1;
        let revision = slot.revision;
        let encoded = serde_json::to_vec_pretty(&slot.job);
        let file = Arc::clone(&slot.file);
        drop(jobs);

        self.write_revision(job_id, &file, revision, encoded).await;
        Ok(value)
    }

    async fn write_revision(
        &self,
        job_id: &str,
        file: &Mutex<u64>,
        revision: u64,
        encoded: serde_json::Result<Vec<u8>>,
    ) {
        let mut written = file.lock().await;
        if *written >= revision {
            debug!(job_id, revision, "Skipping superseded job write");
            return;
        }

        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(job_id, "Failed to encode job: {err}");
                return;
            }
        };
        let path = job_file_path(&self.settings.root, job_id);
        match write_atomic(&path, &bytes).await {
            Ok(()) => *written = revision,
            Err(err) => warn!(job_id, "Failed to persist job: {err:#}"),
        }
    }
}
