//! Filesystem content cache for fetched pages.
//!
//! One file per (source, url) pair, named `<namespace>_<sha256(url)>.html`,
//! where the namespace is the sanitized source name. Freshness is judged by
//! the file's modification time.
//!
//! **Write rules:**
//! - Every write goes to a uniquely named temp file in the cache directory and
//!   is renamed over the target only after the full blob is flushed.
//! - A write abandoned on any path (error, panic, dropped future) removes its
//!   temp file, so readers only ever see a complete old or complete new blob.
//! - Entries are never deleted implicitly; only [`ContentCache::purge`] removes them.

mod write;

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use newsdesk_shared::{NewsdeskError, Result};

use crate::write::PendingWrite;

/// Extension used for cache entries.
const ENTRY_EXT: &str = "html";

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Cache key: a source namespace plus the SHA-256 of the source URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    digest: String,
}

impl CacheKey {
    /// Derive the key for a source. Same name and url always yield the same key.
    pub fn for_source(name: &str, url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        Self {
            namespace: sanitize_namespace(name),
            digest: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// File name of the entry inside the cache directory.
    pub fn file_name(&self) -> String {
        format!("{}_{}.{ENTRY_EXT}", self.namespace, self.digest)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.namespace, &self.digest[..12])
    }
}

/// Replace anything outside `[A-Za-z0-9_.-]` (Unicode word chars allowed) with `_`.
fn sanitize_namespace(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// A fresh (or explicitly stale) cache hit.
#[derive(Debug, Clone)]
pub struct CachedContent {
    pub content: String,
    pub modified: SystemTime,
    pub age: Duration,
}

/// Listing metadata for one entry, handed to purge predicates.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub file_name: String,
    pub namespace: String,
    pub path: PathBuf,
    pub age: Duration,
    pub size: u64,
}

/// Outcome of a purge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub removed: usize,
    pub bytes_freed: u64,
    /// Entries the predicate selected but that could not be removed.
    pub failed: Vec<(PathBuf, String)>,
}

/// Ready-made purge predicates.
pub struct PurgeFilter;

impl PurgeFilter {
    /// Entries strictly older than `max_age`.
    pub fn older_than(max_age: Duration) -> impl Fn(&CacheEntryInfo) -> bool {
        move |entry| entry.age > max_age
    }

    /// Entries belonging to the given source name.
    pub fn namespace(source_name: &str) -> impl Fn(&CacheEntryInfo) -> bool {
        let ns = sanitize_namespace(source_name);
        move |entry| entry.namespace == ns
    }
}

// ---------------------------------------------------------------------------
// ContentCache
// ---------------------------------------------------------------------------

/// TTL-based, content-addressed page cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Open (creating if necessary) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| NewsdeskError::io(&root, e))?;
        debug!(root = %root.display(), "content cache opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Return the entry iff it exists and `now - mtime <= max_age`.
    ///
    /// Misses and unreadable entries yield `None`; this never fails.
    pub fn get(&self, key: &CacheKey, max_age: Duration) -> Option<CachedContent> {
        self.get_at(key, max_age, SystemTime::now())
    }

    /// [`get`](Self::get) with an explicit clock.
    pub fn get_at(&self, key: &CacheKey, max_age: Duration, now: SystemTime) -> Option<CachedContent> {
        let entry = self.read_entry(key, now)?;
        if entry.age > max_age {
            debug!(%key, age_secs = entry.age.as_secs(), "cache entry expired");
            return None;
        }
        Some(entry)
    }

    /// Return the entry regardless of age.
    pub fn get_stale(&self, key: &CacheKey) -> Option<CachedContent> {
        self.read_entry(key, SystemTime::now())
    }

    fn read_entry(&self, key: &CacheKey, now: SystemTime) -> Option<CachedContent> {
        let path = self.entry_path(key);
        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache metadata read failed");
                return None;
            }
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache read failed");
                return None;
            }
        };

        // An mtime in the future (clock skew) counts as brand new.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        Some(CachedContent {
            content,
            modified,
            age,
        })
    }

    /// Atomically replace the entry for `key` with `blob`.
    pub fn put(&self, key: &CacheKey, blob: &str) -> Result<()> {
        let target = self.entry_path(key);
        let (pending, mut file) = PendingWrite::begin(&self.root, &target)?;

        file.write_all(blob.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| NewsdeskError::io(pending.temp_path(), e))?;
        drop(file);

        pending.commit()?;
        debug!(%key, bytes = blob.len(), "cache entry written");
        Ok(())
    }

    /// List all committed entries. Temp files are skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntryInfo>> {
        let now = SystemTime::now();
        let read_dir = fs::read_dir(&self.root).map_err(|e| NewsdeskError::io(&self.root, e))?;

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| NewsdeskError::io(&self.root, e))?;
            let file_name = dir_entry.file_name().to_string_lossy().to_string();
            let Some(namespace) = parse_namespace(&file_name) else {
                continue;
            };

            let path = dir_entry.path();
            let meta = match dir_entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Raced with a purge or rename.
                Err(_) => continue,
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);

            entries.push(CacheEntryInfo {
                file_name,
                namespace,
                path,
                age,
                size: meta.len(),
            });
        }

        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    /// Remove every entry for which `predicate` returns true.
    ///
    /// Readers holding an open handle keep reading the unlinked data.
    pub fn purge<F>(&self, predicate: F) -> Result<PurgeReport>
    where
        F: Fn(&CacheEntryInfo) -> bool,
    {
        let mut report = PurgeReport::default();
        for entry in self.entries()?.into_iter().filter(|e| predicate(e)) {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    report.removed += 1;
                    report.bytes_freed += entry.size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "failed to purge cache entry");
                    report.failed.push((entry.path, e.to_string()));
                }
            }
        }

        info!(
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            failed = report.failed.len(),
            "cache purge complete"
        );
        Ok(report)
    }
}

/// Extract the namespace from `<namespace>_<64 hex>.html`; `None` for anything else.
fn parse_namespace(file_name: &str) -> Option<String> {
    if file_name.starts_with('.') {
        return None;
    }
    let stem = file_name.strip_suffix(&format!(".{ENTRY_EXT}"))?;
    let (namespace, digest) = stem.rsplit_once('_')?;
    let is_digest = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
    is_digest.then(|| namespace.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(label: &str) -> ContentCache {
        let dir = std::env::temp_dir().join(format!("nd-cache-{label}-{}", uuid::Uuid::now_v7()));
        ContentCache::open(dir).expect("open cache")
    }

    fn cleanup(cache: &ContentCache) {
        let _ = fs::remove_dir_all(cache.root());
    }

    #[test]
    fn key_is_deterministic_and_namespaced() {
        let a = CacheKey::for_source("Reuters Business", "https://reuters.com/business");
        let b = CacheKey::for_source("Reuters Business", "https://reuters.com/business");
        assert_eq!(a, b);
        assert_eq!(a.namespace(), "Reuters_Business");
        assert_eq!(a.digest().len(), 64);

        // Same url, different source: different entries.
        let c = CacheKey::for_source("Reuters Tech", "https://reuters.com/business");
        assert_eq!(a.digest(), c.digest());
        assert_ne!(a.file_name(), c.file_name());
    }

    #[test]
    fn sanitize_keeps_unicode_words() {
        assert_eq!(sanitize_namespace("新浪财经"), "新浪财经");
        assert_eq!(sanitize_namespace("a/b:c"), "a_b_c");
        assert_eq!(sanitize_namespace(""), "_");
    }

    #[test]
    fn miss_returns_none() {
        let cache = temp_cache("miss");
        let key = CacheKey::for_source("nobody", "https://nowhere.test/");
        assert!(cache.get(&key, Duration::from_secs(3600)).is_none());
        assert!(cache.get_stale(&key).is_none());
        cleanup(&cache);
    }

    #[test]
    fn put_then_get() {
        let cache = temp_cache("roundtrip");
        let key = CacheKey::for_source("src", "https://a.test/");
        cache.put(&key, "<html>hello</html>").expect("put");
        let hit = cache.get(&key, Duration::from_secs(60)).expect("hit");
        assert_eq!(hit.content, "<html>hello</html>");

        cache.put(&key, "<html>second</html>").expect("overwrite");
        let hit = cache.get(&key, Duration::from_secs(60)).expect("hit");
        assert_eq!(hit.content, "<html>second</html>");
        cleanup(&cache);
    }

    #[test]
    fn ttl_boundary_is_inclusive() {
        let cache = temp_cache("ttl");
        let key = CacheKey::for_source("src", "https://a.test/");
        cache.put(&key, "body").expect("put");

        let modified = fs::metadata(cache.entry_path(&key))
            .and_then(|m| m.modified())
            .expect("mtime");
        let max_age = Duration::from_secs(600);

        let at_boundary = modified + max_age;
        assert!(cache.get_at(&key, max_age, at_boundary).is_some());

        let just_past = at_boundary + Duration::from_millis(1);
        assert!(cache.get_at(&key, max_age, just_past).is_none());

        // Expired entries are still there for stale reads.
        assert!(cache.get_stale(&key).is_some());
        cleanup(&cache);
    }

    #[test]
    fn future_mtime_counts_as_fresh() {
        let cache = temp_cache("skew");
        let key = CacheKey::for_source("src", "https://a.test/");
        cache.put(&key, "body").expect("put");
        let past = SystemTime::now() - Duration::from_secs(3600);
        let hit = cache.get_at(&key, Duration::ZERO, past).expect("hit");
        assert_eq!(hit.age, Duration::ZERO);
        cleanup(&cache);
    }

    #[test]
    fn concurrent_same_key_writers_never_tear() {
        let cache = temp_cache("race");
        let key = CacheKey::for_source("src", "https://a.test/");
        let blobs: Vec<String> = ["a", "b", "c", "d"]
            .iter()
            .map(|c| c.repeat(256 * 1024))
            .collect();

        std::thread::scope(|s| {
            for blob in &blobs {
                let cache = &cache;
                let key = &key;
                s.spawn(move || {
                    for _ in 0..5 {
                        cache.put(key, blob).expect("put");
                    }
                });
            }
            for _ in 0..4 {
                let cache = &cache;
                let key = &key;
                s.spawn(move || {
                    for _ in 0..20 {
                        if let Some(hit) = cache.get_stale(key) {
                            let first = hit.content.as_bytes()[0];
                            assert_eq!(hit.content.len(), 256 * 1024);
                            assert!(hit.content.bytes().all(|b| b == first));
                        }
                    }
                });
            }
        });

        let final_blob = cache.get_stale(&key).expect("entry").content;
        assert!(blobs.contains(&final_blob));

        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(cache.root())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        cleanup(&cache);
    }

    #[test]
    fn entries_and_purge() {
        let cache = temp_cache("purge");
        let a = CacheKey::for_source("alpha", "https://a.test/");
        let b = CacheKey::for_source("beta", "https://b.test/");
        cache.put(&a, "aaa").expect("put a");
        cache.put(&b, "bbbb").expect("put b");
        // Stray files are ignored.
        fs::write(cache.root().join("notes.txt"), "x").expect("write stray");
        fs::write(cache.root().join(".alpha_x.tmp"), "x").expect("write temp");

        let entries = cache.entries().expect("entries");
        let namespaces: Vec<_> = entries.iter().map(|e| e.namespace.as_str()).collect();
        assert_eq!(namespaces, ["alpha", "beta"]);

        let report = cache.purge(PurgeFilter::namespace("beta")).expect("purge");
        assert_eq!(report.removed, 1);
        assert_eq!(report.bytes_freed, 4);
        assert!(cache.get_stale(&b).is_none());
        assert!(cache.get_stale(&a).is_some());

        // Nothing is older than an hour yet.
        let report = cache
            .purge(PurgeFilter::older_than(Duration::from_secs(3600)))
            .expect("purge");
        assert_eq!(report.removed, 0);

        let report = cache.purge(|_| true).expect("purge all");
        assert_eq!(report.removed, 1);
        assert!(cache.root().join("notes.txt").exists());
        cleanup(&cache);
    }

    #[test]
    fn parse_namespace_rules() {
        let key = CacheKey::for_source("my_source", "https://a.test/");
        assert_eq!(parse_namespace(&key.file_name()).as_deref(), Some("my_source"));
        assert_eq!(parse_namespace("my_source_abc.html"), None);
        assert_eq!(parse_namespace(".tmp_file.html"), None);
        assert_eq!(parse_namespace("readme.md"), None);
    }
}
