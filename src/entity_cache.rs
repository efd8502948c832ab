use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
struct CachedEntity<V> {
    value: V,
    #[serde(with = "chrono::serde::ts_seconds")]
    cached_at: DateTime<Utc>,
}

impl<V> CachedEntity<V> {
    fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.cached_at);
        age >= Duration::zero() && age < ttl
    }
}

/// Per-entity TTL cache persisted as one JSON file per id.
///
/// Used for slow-changing lookups (channel info, icons). Entries are few and
/// small, so there is no size bound; expiry is the only way out. Disk writes
/// are best-effort.
pub struct EntityCache<V> {
    cache_dir: PathBuf,
    entries: HashMap<String, CachedEntity<V>>,
    ttl: Duration,
}

impl<V> EntityCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Open `<user cache dir>/holodash/<namespace>`
    pub fn open(namespace: &str, ttl: Duration) -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .context("Failed to get cache directory")?
            .join("holodash")
            .join(namespace);

        Self::at(cache_dir, ttl)
    }

    pub fn at(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;

        Ok(Self {
            cache_dir,
            entries: HashMap::new(),
            ttl,
        })
    }

    pub fn get(&mut self, id: &str) -> Option<V> {
        self.get_at(id, Utc::now())
    }

    pub fn insert(&mut self, id: &str, value: V) {
        self.insert_at(id, value, Utc::now())
    }

    fn get_at(&mut self, id: &str, now: DateTime<Utc>) -> Option<V> {
        // Check memory cache first
        if let Some(entry) = self.entries.get(id) {
            if entry.is_fresh(self.ttl, now) {
                return Some(entry.value.clone());
            }
            self.entries.remove(id);
        }

        if let Some(entry) = self.load_from_disk(id) {
            if entry.is_fresh(self.ttl, now) {
                let value = entry.value.clone();
                self.entries.insert(id.to_string(), entry);
                return Some(value);
            }
            let _ = self.remove_from_disk(id);
        }

        None
    }

    fn insert_at(&mut self, id: &str, value: V, now: DateTime<Utc>) {
        let entry = CachedEntity {
            value,
            cached_at: now,
        };

        if let Err(e) = self.save_to_disk(id, &entry) {
            tracing::debug!("Could not persist cache entry {}: {}", id, e);
        }

        self.entries.insert(id.to_string(), entry);
    }

    /// Drop expired entries from memory and delete every file in the cache
    /// directory that is expired or unreadable. Returns the number of files
    /// removed.
    pub fn clear_expired(&mut self) -> Result<usize> {
        let now = Utc::now();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.is_fresh(ttl, now));

        let mut removed = 0;
        let dir = fs::read_dir(&self.cache_dir)
            .with_context(|| format!("Failed to read cache directory {}", self.cache_dir.display()))?;

        for dir_entry in dir {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let fresh = fs::read_to_string(&path)
                .ok()
                .and_then(|contents| serde_json::from_str::<CachedEntity<V>>(&contents).ok())
                .is_some_and(|entry| entry.is_fresh(ttl, now));

            if !fresh {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// `<cache dir>/<percent-encoded id>.json`
    fn disk_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", urlencoding::encode(id)))
    }

    fn load_from_disk(&self, id: &str) -> Option<CachedEntity<V>> {
        let path = self.disk_path(id);
        if !path.exists() {
            return None;
        }

        let contents = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn save_to_disk(&self, id: &str, entry: &CachedEntity<V>) -> Result<()> {
        let contents = serde_json::to_string(entry)?;
        fs::write(self.disk_path(id), contents)?;
        Ok(())
    }

    fn remove_from_disk(&self, id: &str) -> Result<()> {
        let path = self.disk_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = EntityCache::at(dir.path(), Duration::hours(24)).unwrap();

        cache.insert("UC1", "https://img/1.jpg".to_string());
        assert_eq!(cache.get("UC1").as_deref(), Some("https://img/1.jpg"));
        assert_eq!(cache.get("UC2"), None);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = EntityCache::at(dir.path(), Duration::days(7)).unwrap();
            cache.insert("UC1", 42u32);
        }

        let mut cache: EntityCache<u32> = EntityCache::at(dir.path(), Duration::days(7)).unwrap();
        assert_eq!(cache.get("UC1"), Some(42));
    }

    #[test]
    fn test_expired_entry_removed_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = EntityCache::at(dir.path(), Duration::hours(24)).unwrap();
        let then = Utc::now() - Duration::hours(25);

        cache.insert_at("UC1", 1u32, then);
        assert!(cache.disk_path("UC1").exists());

        assert_eq!(cache.get("UC1"), None);
        assert!(!cache.disk_path("UC1").exists());
    }

    #[test]
    fn test_valid_just_before_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = EntityCache::at(dir.path(), Duration::hours(24)).unwrap();
        let now = Utc::now();

        cache.insert_at("UC1", 1u32, now - Duration::hours(24) + Duration::seconds(1));
        assert_eq!(cache.get_at("UC1", now), Some(1));
    }

    #[test]
    fn test_clear_expired() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = EntityCache::at(dir.path(), Duration::hours(1)).unwrap();

        cache.insert_at("old", 1u32, Utc::now() - Duration::hours(2));
        cache.insert("new", 2u32);
        assert_eq!(cache.clear_expired().unwrap(), 1);

        assert!(!cache.disk_path("old").exists());
        assert_eq!(cache.get("new"), Some(2));
    }

    #[test]
    fn test_clear_expired_sweeps_files_never_loaded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = EntityCache::at(dir.path(), Duration::hours(1)).unwrap();
            writer.insert_at("stale", 1u32, Utc::now() - Duration::hours(2));
        }
        fs::write(dir.path().join("5f1c9a0e2b7d3c44.json"), "not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let mut cache: EntityCache<u32> = EntityCache::at(dir.path(), Duration::hours(1)).unwrap();
        assert_eq!(cache.clear_expired().unwrap(), 2);

        let left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(left, vec![std::ffi::OsString::from("notes.txt")]);
    }

    #[test]
    fn test_file_name_is_stable_encoded_id() {
        let dir = tempfile::tempdir().unwrap();
        let cache: EntityCache<u32> = EntityCache::at(dir.path(), Duration::hours(1)).unwrap();

        assert_eq!(cache.disk_path("UCp6993wxpyDPHUpavwDFqgg"), dir.path().join("UCp6993wxpyDPHUpavwDFqgg.json"));
        assert_eq!(cache.disk_path("a/b c"), dir.path().join("a%2Fb%20c.json"));
    }
}
