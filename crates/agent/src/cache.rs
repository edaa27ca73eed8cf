//! Persistent spec cache (tier 2 of the lookup chain).

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use ocp_openapi_tools::{GenerateOptions, generate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One cached document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    /// Raw document text.
    pub payload: String,
    pub fetched_at: DateTime<Utc>,
    /// `registry:<name>` or the document URL.
    pub source: String,
    /// Where the document was downloaded from, for refetching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_url: Option<String>,
    /// Base URL override in effect when the entry was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(key: impl Into<String>, payload: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            fetched_at: Utc::now(),
            source: source.into(),
            spec_url: None,
            base_url: None,
        }
    }

    /// Fresh while `now - fetched_at <= max_age_days`. A zero TTL is never fresh.
    #[must_use]
    pub fn is_fresh(&self, max_age_days: u32, now: DateTime<Utc>) -> bool {
        max_age_days > 0 && now - self.fetched_at <= Duration::days(i64::from(max_age_days))
    }
}

/// Key-value storage for [`CacheEntry`]s.
pub trait CacheStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be read or parsed.
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// # Errors
    ///
    /// Returns an error if the entry cannot be written.
    fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Returns whether an entry was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn list_keys(&self) -> Result<Vec<String>>;
}

/// One JSON file per key under `<root>/cache/apis`.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join("cache").join("apis");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

// API names are usually safe file stems already; anything else is hashed.
fn file_stem(key: &str) -> String {
    let safe = !key.is_empty()
        && key.len() <= 100
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if safe {
        key.to_string()
    } else {
        format!("h-{}", hex::encode(Sha256::digest(key.as_bytes())))
    }
}

impl CacheStore for FsCacheStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry = serde_json::from_str(&text)?;
        Ok((entry.key == key).then_some(entry))
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entry)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .ok()
                .and_then(|t| serde_json::from_str::<CacheEntry>(&t).ok());
            match parsed {
                Some(entry) => keys.push(entry.key),
                None => tracing::debug!(path = %path.display(), "Skipping unreadable cache file"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Process-local store, for tests and cache-less embedding.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.entries.lock().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Listing row for a cached API matched by [`search_cache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedApiSummary {
    pub name: String,
    pub title: String,
    pub version: String,
    pub base_url: String,
    pub fetched_at: DateTime<Utc>,
    pub tool_count: usize,
}

/// Cached APIs whose name, title or any tool description contains `query` (case-insensitive).
/// Entries that cannot be read or no longer generate are skipped. Sorted by name.
///
/// # Errors
///
/// Returns an error if the store cannot be enumerated.
pub fn search_cache(store: &dyn CacheStore, query: &str) -> Result<Vec<CachedApiSummary>> {
    let needle = query.to_lowercase();
    let mut found = Vec::new();
    for key in store.list_keys()? {
        let entry = match store.get(&key) {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Unreadable cache entry");
                continue;
            }
        };
        let options = GenerateOptions {
            base_url: entry.base_url.clone(),
            spec_url: entry.spec_url.clone(),
        };
        let api = match generate(&entry.payload, &options) {
            Ok(api) => api,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Cached spec no longer generates");
                continue;
            }
        };
        let hit = key.to_lowercase().contains(&needle)
            || api.title.to_lowercase().contains(&needle)
            || api
                .tools
                .iter()
                .any(|t| t.description.to_lowercase().contains(&needle));
        if hit {
            found.push(CachedApiSummary {
                name: entry.key,
                title: api.title,
                version: api.version,
                base_url: api.base_url,
                fetched_at: entry.fetched_at,
                tool_count: api.tools.len(),
            });
        }
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}
