use crate::clock::{Clock, SystemClock};
use analysis_core::ScreenError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Temp files untouched for this long belong to a dead writer
const STALE_TMP_AGE: Duration = Duration::from_secs(3600);

/// On-disk entry layout
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
    ttl_hours: f64,
    key: String,
}

impl StoredEntry {
    fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 3_600_000.0
    }

    /// Compared in hours so huge TTLs never overflow a timestamp; a NaN
    /// TTL counts as expired.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !(self.age_hours(now) < self.ttl_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Percentage of lookups that hit, 0 when nothing was looked up
    pub hit_rate: f64,
    pub total_entries: usize,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub ttl_hours: f64,
    pub age_hours: f64,
    pub is_expired: bool,
    pub size_bytes: u64,
}

/// Process-shared TTL cache backed by one file per key.
///
/// Writes go to a unique temp file and are renamed into place, so a reader
/// never sees a half-written entry.
pub struct CacheManager {
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    tmp_seq: AtomicU64,
}

impl CacheManager {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, ScreenError> {
        Self::with_clock(cache_dir, Arc::new(SystemClock))
    }

    pub fn with_clock(cache_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, ScreenError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// `<user cache dir>/equity-screener`, or `.cache` when there is none.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("equity-screener"))
            .unwrap_or_else(|| PathBuf::from(".cache"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn read_entry(path: &Path) -> Result<StoredEntry, ScreenError> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn remove(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove cache file {}: {}", path.display(), e);
            }
        }
    }

    fn miss<T>(&self) -> Option<T> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Cached value for `key`, or None when absent, corrupt or expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        if !path.exists() {
            return self.miss();
        }

        let entry = match Self::read_entry(&path) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Corrupt cache entry for {}: {}", key, e);
                Self::remove(&path);
                return self.miss();
            }
        };

        if entry.key != key {
            tracing::debug!("Cache key mismatch for {} (stored {})", key, entry.key);
            return self.miss();
        }

        if entry.is_expired(self.clock.now()) {
            tracing::debug!("Cache entry expired: {}", key);
            Self::remove(&path);
            return self.miss();
        }

        match serde_json::from_value(entry.data) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("Cache entry for {} has unexpected shape: {}", key, e);
                Self::remove(&path);
                self.miss()
            }
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl_hours: f64) -> Result<(), ScreenError> {
        if !ttl_hours.is_finite() || ttl_hours < 0.0 {
            return Err(ScreenError::InvalidConfig(format!(
                "cache ttl must be a non-negative number of hours, got {}",
                ttl_hours
            )));
        }
        let entry = StoredEntry {
            data: serde_json::to_value(value)?,
            timestamp: self.clock.now(),
            ttl_hours,
            key: key.to_string(),
        };
        let body = serde_json::to_vec_pretty(&entry)?;

        let path = self.path_for(key);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));

        if let Err(e) = fs::write(&tmp_path, &body) {
            Self::remove(&tmp_path);
            return Err(e.into());
        }
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            ScreenError::CacheIo(format!("atomic rename failed: {}", e))
        })?;

        self.sets.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cached {} ({}h)", key, ttl_hours);
        Ok(())
    }

    /// Drop the entry for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to invalidate {}: {}", key, e);
                }
                false
            }
        }
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        self.files_with_extension("json")
    }

    fn tmp_files(&self) -> Vec<PathBuf> {
        self.files_with_extension("tmp")
    }

    fn files_with_extension(&self, extension: &str) -> Vec<PathBuf> {
        let read_dir = match fs::read_dir(&self.cache_dir) {
            Ok(rd) => rd,
            Err(e) => {
                tracing::warn!("Cannot list cache dir {}: {}", self.cache_dir.display(), e);
                return Vec::new();
            }
        };
        read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(extension))
            .collect()
    }

    /// Delete every expired or unreadable entry, plus temp files left by
    /// writers that died. Returns how many files were removed.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        for path in self.entry_files() {
            let stale = match Self::read_entry(&path) {
                Ok(entry) => entry.is_expired(now),
                Err(_) => true,
            };
            if stale && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        for path in self.tmp_files() {
            let abandoned = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .is_some_and(|age| age >= STALE_TMP_AGE);
            if abandoned && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Removed {} stale cache entries", removed);
        }
        removed
    }

    /// Delete every entry and temp file. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        self.entry_files()
            .into_iter()
            .chain(self.tmp_files())
            .filter(|p| fs::remove_file(p).is_ok())
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 { hits as f64 / lookups as f64 * 100.0 } else { 0.0 },
            total_entries: self.entry_files().len(),
            cache_dir: self.cache_dir.clone(),
        }
    }

    /// Metadata for `key` without touching the hit/miss counters.
    pub fn entry_info(&self, key: &str) -> Option<CacheEntryInfo> {
        let path = self.path_for(key);
        let entry = Self::read_entry(&path).ok()?;
        let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let now = self.clock.now();

        Some(CacheEntryInfo {
            is_expired: entry.is_expired(now),
            age_hours: entry.age_hours(now),
            key: entry.key,
            created_at: entry.timestamp,
            ttl_hours: entry.ttl_hours,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        ticker: String,
        price: f64,
    }

    fn payload() -> Payload {
        Payload { ticker: "AAPL".to_string(), price: 195.5 }
    }

    fn manual_cache() -> (TempDir, Arc<ManualClock>, CacheManager) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let cache = CacheManager::with_clock(dir.path(), clock.clone()).unwrap();
        (dir, clock, cache)
    }

    #[test]
    fn test_set_then_get() {
        let (_dir, _clock, cache) = manual_cache();
        cache.set("fundamentals:AAPL", &payload(), 1.0).unwrap();
        let got: Option<Payload> = cache.get("fundamentals:AAPL");
        assert_eq!(got, Some(payload()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let (_dir, clock, cache) = manual_cache();
        cache.set("k", &payload(), 1.0).unwrap();
        let path = cache.path_for("k");
        assert!(path.exists());

        clock.advance(Duration::minutes(61));
        assert_eq!(cache.get::<Payload>("k"), None);
        assert!(!path.exists());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_not_expired_before_ttl() {
        let (_dir, clock, cache) = manual_cache();
        cache.set("k", &payload(), 24.0).unwrap();
        clock.advance(Duration::hours(23));
        assert!(cache.get::<Payload>("k").is_some());
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let (_dir, _clock, cache) = manual_cache();
        cache.set("k", &1u32, 1.0).unwrap();
        cache.set("k", &2u32, 1.0).unwrap();
        assert_eq!(cache.get::<u32>("k"), Some(2));
        assert_eq!(cache.stats().total_entries, 1);
    }

    #[test]
    fn test_corrupt_file_is_miss_and_removed() {
        let (_dir, _clock, cache) = manual_cache();
        let path = cache.path_for("bad");
        fs::write(&path, b"{not json").unwrap();
        assert_eq!(cache.get::<Payload>("bad"), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_file_layout() {
        let (_dir, _clock, cache) = manual_cache();
        cache.set("universe:sp500", &vec!["AAPL", "MSFT"], 168.0).unwrap();
        let path = cache.path_for("universe:sp500");
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(name.len(), 64 + ".json".len());

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["key"], "universe:sp500");
        assert_eq!(raw["ttl_hours"], 168.0);
        assert_eq!(raw["data"][1], "MSFT");
        assert!(raw["timestamp"].as_str().unwrap().starts_with("2024-06-01T12:00:00"));
    }

    #[test]
    fn test_clear_expired_sweeps_stale_and_corrupt() {
        let (_dir, clock, cache) = manual_cache();
        cache.set("short", &1u32, 1.0).unwrap();
        cache.set("long", &2u32, 48.0).unwrap();
        fs::write(cache.cache_dir().join("garbage.json"), b"???").unwrap();

        clock.advance(Duration::hours(2));
        assert_eq!(cache.clear_expired(), 2);
        assert_eq!(cache.get::<u32>("long"), Some(2));
        assert_eq!(cache.stats().total_entries, 1);
    }

    #[test]
    fn test_invalidate_and_clear_all() {
        let (_dir, _clock, cache) = manual_cache();
        cache.set("a", &1u32, 1.0).unwrap();
        cache.set("b", &2u32, 1.0).unwrap();
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.clear_all(), 1);
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_entry_info() {
        let (_dir, clock, cache) = manual_cache();
        cache.set("k", &payload(), 2.0).unwrap();
        clock.advance(Duration::minutes(90));

        let info = cache.entry_info("k").unwrap();
        assert_eq!(info.key, "k");
        assert!((info.age_hours - 1.5).abs() < 1e-9);
        assert!(!info.is_expired);
        assert!(info.size_bytes > 0);
        assert!(cache.entry_info("missing").is_none());

        clock.advance(Duration::hours(1));
        assert!(cache.entry_info("k").unwrap().is_expired);
    }

    #[test]
    fn test_hit_rate() {
        let (_dir, _clock, cache) = manual_cache();
        assert_eq!(cache.stats().hit_rate, 0.0);
        cache.set("k", &1u32, 1.0).unwrap();
        let _ = cache.get::<u32>("k");
        let _ = cache.get::<u32>("nope");
        assert!((cache.stats().hit_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let (_dir, clock, cache) = manual_cache();
        cache.set("forever", &1u32, 1.0e12).unwrap();
        clock.advance(Duration::days(365 * 50));
        assert_eq!(cache.get::<u32>("forever"), Some(1));
        assert_eq!(cache.clear_expired(), 0);
        assert!(!cache.entry_info("forever").unwrap().is_expired);

        // written by hand: beyond any representable timestamp
        let path = cache.path_for("far");
        let body = r#"{"data":7,"timestamp":"2024-06-01T12:00:00Z","ttl_hours":1e300,"key":"far"}"#;
        fs::write(&path, body).unwrap();
        assert_eq!(cache.get::<u32>("far"), Some(7));
    }

    #[test]
    fn test_invalid_ttl_rejected() {
        let (_dir, _clock, cache) = manual_cache();
        for ttl in [f64::NAN, f64::INFINITY, -1.0] {
            assert!(matches!(cache.set("k", &1u32, ttl), Err(ScreenError::InvalidConfig(_))));
        }
        assert_eq!(cache.stats().total_entries, 0);
        assert!(cache.set("k", &1u32, 0.0).is_ok());
        // zero TTL is already expired
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[test]
    fn test_leftover_temp_files_are_swept() {
        let (_dir, _clock, cache) = manual_cache();
        cache.set("k", &1u32, 1.0).unwrap();
        let fresh = cache.cache_dir().join("abc.1.2.tmp");
        let old = cache.cache_dir().join("abc.1.3.tmp");
        fs::write(&fresh, b"{").unwrap();
        fs::write(&old, b"{").unwrap();
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::hours(2).to_std().unwrap())
            .unwrap();

        // a recent temp file may belong to a live writer
        assert_eq!(cache.clear_expired(), 1);
        assert!(fresh.exists());
        assert!(!old.exists());
        assert_eq!(cache.stats().total_entries, 1);

        assert_eq!(cache.clear_all(), 2);
        assert!(!fresh.exists());
    }
}
