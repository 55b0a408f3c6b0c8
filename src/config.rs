use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Result;
use chrono::Duration as ChronoDuration;

use crate::{
    job_store::JobStoreSettings, pipeline::PipelineSettings, search_cache::SearchCacheSettings,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub cache_path: PathBuf,
    pub max_playlist_size: usize,
    pub search_delay: Duration,
    pub transfer_delay: Duration,
    pub job_persist_every: usize,
    pub cache_flush_every: usize,
    pub cache_ttl: ChronoDuration,
    pub job_retention: ChronoDuration,
    pub job_sweep_interval: Duration,
    pub cache_sweep_interval: Duration,
    pub progress_buffer: usize,
    pub youtube_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw =
            env::var("PLAYLIST_MIGRATE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_addr = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let cache_path = PathBuf::from(
            env::var("PLAYLIST_MIGRATE_CACHE_PATH").unwrap_or_else(|_| "./cache".to_string()),
        );

        let youtube_api_base = env::var("PLAYLIST_MIGRATE_YOUTUBE_API_BASE")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "https://www.googleapis.com/youtube/v3".to_string());

        Ok(Self {
            bind_addr,
            cache_path,
            max_playlist_size: env_or("PLAYLIST_MIGRATE_MAX_PLAYLIST_SIZE", 500),
            search_delay: Duration::from_millis(env_or("PLAYLIST_MIGRATE_SEARCH_DELAY_MS", 2000)),
            transfer_delay: Duration::from_millis(env_or("PLAYLIST_MIGRATE_TRANSFER_DELAY_MS", 300)),
            job_persist_every: env_or("PLAYLIST_MIGRATE_JOB_PERSIST_EVERY", 10usize).max(1),
            cache_flush_every: env_or("PLAYLIST_MIGRATE_CACHE_FLUSH_EVERY", 10usize).max(1),
            cache_ttl: ChronoDuration::days(env_or("PLAYLIST_MIGRATE_CACHE_TTL_DAYS", 30)),
            job_retention: ChronoDuration::days(env_or("PLAYLIST_MIGRATE_JOB_RETENTION_DAYS", 7)),
            job_sweep_interval: Duration::from_secs(
                env_or("PLAYLIST_MIGRATE_JOB_SWEEP_SECONDS", 60 * 60u64).max(1),
            ),
            cache_sweep_interval: Duration::from_secs(
                env_or("PLAYLIST_MIGRATE_CACHE_SWEEP_SECONDS", 24 * 60 * 60u64).max(1),
            ),
            progress_buffer: env_or("PLAYLIST_MIGRATE_PROGRESS_BUFFER", 64),
            youtube_api_base,
        })
    }

    pub fn jobs_root(&self) -> PathBuf {
        self.cache_path.join("jobs")
    }

    pub fn job_store_settings(&self) -> JobStoreSettings {
        JobStoreSettings {
            root: self.jobs_root(),
            max_tracks: self.max_playlist_size,
            persist_every: self.job_persist_every,
        }
    }

    pub fn search_cache_settings(&self) -> SearchCacheSettings {
        SearchCacheSettings {
            path: self.cache_path.join("search_cache.json"),
            ttl: self.cache_ttl,
            flush_every: self.cache_flush_every,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            search_delay: self.search_delay,
            transfer_delay: self.transfer_delay,
        }
    }
}

/// Unset or unparsable values fall back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
