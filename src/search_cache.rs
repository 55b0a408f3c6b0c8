use std::{
    collections::HashMap,
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    sync::{Mutex, RwLock},
};
use tracing::{debug, info, warn};

use crate::{models::TrackMatch, persist::write_atomic};

#[derive(Debug, Clone)]
pub struct SearchCacheSettings {
    pub path: PathBuf,
    pub ttl: ChronoDuration,
    /// Number of inserts between snapshot flushes.
    pub flush_every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    result: Option<TrackMatch>,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub path: PathBuf,
}

/// Canonical lookup key. Artists are normalized and sorted so ordering does
/// not matter; the title is only trimmed and lowercased, so punctuation or
/// featuring suffixes still produce distinct keys.
pub fn cache_key(artists: &[String], title: &str) -> String {
    let mut normalized: Vec<String> = artists
        .iter()
        .map(|artist| artist.trim().to_lowercase())
        .collect();
    normalized.sort();
    format!("{}::{}", normalized.join("|"), title.trim().to_lowercase())
}

/// Search results keyed by (artist set, title), held in memory and flushed
/// to a single JSON snapshot. A crash loses at most the inserts made since
/// the last flush.
#[derive(Debug)]
pub struct SearchCache {
    settings: SearchCacheSettings,
    entries: RwLock<HashMap<String, CacheEntry>>,
    inserts_since_flush: AtomicUsize,
    io: Mutex<()>,
}

impl SearchCache {
    pub fn new(settings: SearchCacheSettings) -> Self {
        Self {
            settings,
            entries: RwLock::new(HashMap::new()),
            inserts_since_flush: AtomicUsize::new(0),
            io: Mutex::new(()),
        }
    }

    /// Loads the snapshot if one exists. An unreadable snapshot is logged and
    /// the cache starts empty.
    pub async fn open(settings: SearchCacheSettings) -> Self {
        let cache = Self::new(settings);
        match cache.load_snapshot().await {
            Ok(Some(entries)) => {
                info!(
                    entries = entries.len(),
                    path = %cache.settings.path.display(),
                    "Loaded search cache snapshot"
                );
                *cache.entries.write().await = entries;
            }
            Ok(None) => {}
            Err(err) => warn!("Failed to load search cache, starting empty: {err:#}"),
        }
        cache
    }

    async fn load_snapshot(&self) -> Result<Option<HashMap<String, CacheEntry>>> {
        let path = &self.settings.path;
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let entries = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(entries))
    }

    /// `None` means never searched or expired. `Some(None)` is a cached
    /// "no match" and must not trigger a new search.
    pub async fn lookup(&self, artists: &[String], title: &str) -> Option<Option<TrackMatch>> {
        self.lookup_at(&cache_key(artists, title), Utc::now()).await
    }

    async fn lookup_at(&self, key: &str, now: DateTime<Utc>) -> Option<Option<TrackMatch>> {
        {
            let entries = self.entries.read().await;
            let entry = entries.get(key)?;
            if !self.is_expired(entry, now) {
                return Some(entry.result.clone());
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            entries.remove(key);
            debug!(key, "Evicted expired search cache entry");
        }
        None
    }

    pub async fn store(&self, artists: &[String], title: &str, result: Option<TrackMatch>) {
        self.store_at(cache_key(artists, title), result, Utc::now())
            .await;
    }

    async fn store_at(&self, key: String, result: Option<TrackMatch>, cached_at: DateTime<Utc>) {
        self.entries
            .write()
            .await
            .insert(key, CacheEntry { result, cached_at });

        let inserts = self.inserts_since_flush.fetch_add(1, Ordering::SeqCst) + 1;
        if inserts >= self.settings.flush_every.max(1) {
            self.inserts_since_flush.store(0, Ordering::SeqCst);
            if let Err(err) = self.flush().await {
                warn!("Failed to flush search cache: {err:#}");
            }
        }
    }

    /// Writes the full cache as one snapshot.
    pub async fn flush(&self) -> Result<()> {
        // Held across encode and write so a later snapshot never lands first.
        let _io = self.io.lock().await;
        let (bytes, count) = {
            let entries = self.entries.read().await;
            let bytes =
                serde_json::to_vec_pretty(&*entries).context("Failed to encode search cache")?;
            (bytes, entries.len())
        };
        write_atomic(&self.settings.path, &bytes).await?;
        debug!(entries = count, "Flushed search cache");
        Ok(())
    }

    /// Removes every expired entry and flushes if anything was removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| !self.is_expired(entry, now));
            before - entries.len()
        };

        if removed > 0 {
            info!(removed, "Purged expired search cache entries");
            if let Err(err) = self.flush().await {
                warn!("Failed to flush search cache after purge: {err:#}");
            }
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().await.len(),
            path: self.settings.path.clone(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.cached_at >= self.settings.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path, flush_every: usize) -> SearchCacheSettings {
        SearchCacheSettings {
            path: dir.join("search_cache.json"),
            ttl: ChronoDuration::days(30),
            flush_every,
        }
    }

    fn artists(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn hit(id: &str) -> TrackMatch {
        TrackMatch {
            id: id.to_string(),
            title: "Song (Official Video)".to_string(),
            channel: "ArtistVEVO".to_string(),
            thumbnail: Some("https://i.ytimg.com/vi/x/default.jpg".to_string()),
        }
    }

    #[test]
    fn key_ignores_artist_order_case_and_padding() {
        let expected = cache_key(&artists(&["a", "b", "c"]), "song");
        for permutation in [
            ["a", "b", "c"],
            ["a", "c", "b"],
            ["b", "a", "c"],
            ["b", "c", "a"],
            ["c", "a", "b"],
            ["c", "b", "a"],
        ] {
            assert_eq!(cache_key(&artists(&permutation), "song"), expected);
        }
        assert_eq!(
            cache_key(&artists(&["  B ", "A"]), " Song "),
            cache_key(&artists(&["a", "b"]), "song")
        );
    }

    #[test]
    fn key_is_sensitive_to_title_punctuation() {
        assert_ne!(
            cache_key(&artists(&["a"]), "song"),
            cache_key(&artists(&["a"]), "song!")
        );
    }

    #[tokio::test]
    async fn cached_no_match_is_distinct_from_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SearchCache::new(settings(dir.path(), 100));
        let names = artists(&["Nobody"]);

        assert_eq!(cache.lookup(&names, "Unknown").await, None);
        cache.store(&names, "Unknown", None).await;
        assert_eq!(cache.lookup(&names, "Unknown").await, Some(None));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SearchCache::new(settings(dir.path(), 100));
        let names = artists(&["Old"]);
        let key = cache_key(&names, "Song");

        cache
            .store_at(
                key.clone(),
                Some(hit("old")),
                Utc::now() - ChronoDuration::days(31),
            )
            .await;
        assert_eq!(cache.stats().await.entries, 1);

        assert_eq!(cache.lookup(&names, "Song").await, None);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn entry_inside_window_is_served() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SearchCache::new(settings(dir.path(), 100));
        let names = artists(&["Recent"]);
        let key = cache_key(&names, "Song");

        cache
            .store_at(key, Some(hit("new")), Utc::now() - ChronoDuration::days(29))
            .await;
        assert_eq!(cache.lookup(&names, "Song").await, Some(Some(hit("new"))));
    }

    #[tokio::test]
    async fn purge_removes_expired_and_flushes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SearchCache::new(settings(dir.path(), 100));
        let stale = Utc::now() - ChronoDuration::days(40);

        cache
            .store_at(cache_key(&artists(&["a"]), "one"), None, stale)
            .await;
        cache
            .store_at(cache_key(&artists(&["b"]), "two"), Some(hit("2")), stale)
            .await;
        cache.store(&artists(&["c"]), "three", Some(hit("3"))).await;

        assert_eq!(cache.purge_expired().await, 2);
        assert_eq!(cache.purge_expired().await, 0);

        let reopened = SearchCache::open(settings(dir.path(), 100)).await;
        assert_eq!(reopened.stats().await.entries, 1);
        assert_eq!(
            reopened.lookup(&artists(&["c"]), "three").await,
            Some(Some(hit("3")))
        );
    }

    #[tokio::test]
    async fn snapshot_is_written_every_nth_insert() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = SearchCache::new(settings(dir.path(), 2));

        cache.store(&artists(&["a"]), "one", Some(hit("1"))).await;
        assert!(!dir.path().join("search_cache.json").exists());

        cache.store(&artists(&["b"]), "two", None).await;
        let reopened = SearchCache::open(settings(dir.path(), 2)).await;
        assert_eq!(reopened.stats().await.entries, 2);
        assert_eq!(reopened.lookup(&artists(&["b"]), "two").await, Some(None));
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("search_cache.json"), b"{not json")
            .await
            .expect("write corrupt snapshot");

        let cache = SearchCache::open(settings(dir.path(), 10)).await;
        assert_eq!(cache.stats().await.entries, 0);
    }
}
