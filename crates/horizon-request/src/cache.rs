//! On-disk response cache.
//!
//! Each entry is a single JSON file `<base>/<fingerprint>.cache` holding the
//! versioning metadata and the base64 encoded response body. Writes go to a
//! temporary file in the cache directory which is then renamed over the
//! target, so readers never observe a partially written entry.
//!
//! # Example
//!
//! ```no_run
//! use horizon_request::cache::{CacheExpectation, CacheStore};
//!
//! let store = CacheStore::new("/tmp/horizon-cache").with_app_version("2.4.0");
//! let expectation = CacheExpectation::new(60).version(3);
//! let metadata = store.metadata_for(&expectation);
//! store.save("abc123", b"{\"ok\":true}", &metadata).unwrap();
//! let cached = store.load("abc123", &expectation).unwrap();
//! assert_eq!(&cached.data[..], b"{\"ok\":true}");
//! ```

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use horizon_request_core::logging::targets;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::descriptor::HttpMethod;
use crate::error::CacheErrorKind;

/// Version of the on-disk entry layout.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

const CACHE_EXTENSION: &str = "cache";

/// Source of the current time for TTL checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Errors raised while writing a cache entry.
#[derive(Debug, thiserror::Error)]
pub enum CacheWriteError {
    /// Filesystem failure.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The entry could not be encoded.
    #[error("cache encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    /// The temporary file could not be moved into place.
    #[error("cache persist error: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// What a request expects of a cache entry it is willing to use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheExpectation {
    /// Entries written with another version are rejected.
    pub cache_version: i64,
    /// Entries written with other sensitive data are rejected.
    pub sensitive_data: Option<String>,
    /// Maximum age in seconds; non-positive values disable reads.
    pub ttl_seconds: i64,
}

impl CacheExpectation {
    /// Expect entries younger than `ttl_seconds`.
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            ..Self::default()
        }
    }

    /// Set the expected cache version.
    pub fn version(mut self, cache_version: i64) -> Self {
        self.cache_version = cache_version;
        self
    }

    /// Set the expected sensitive data.
    pub fn sensitive_data(mut self, sensitive_data: impl Into<String>) -> Self {
        self.sensitive_data = Some(sensitive_data.into());
        self
    }
}

/// Metadata stored alongside a cached payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Request-defined version.
    pub cache_version: i64,
    /// Request-defined sensitive data description.
    pub sensitive_data: Option<String>,
    /// Application version that wrote the entry.
    pub app_version: Option<String>,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// The writer's cache time, informational.
    pub ttl_seconds: i64,
}

/// A payload read back from the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedPayload {
    /// The cached response body.
    pub data: Bytes,
    /// The entry's metadata.
    pub metadata: CacheMetadata,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    schema_version: u32,
    #[serde(flatten)]
    metadata: CacheMetadata,
    payload: String,
}

/// Shared, thread-safe on-disk cache.
#[derive(Clone)]
pub struct CacheStore {
    base: PathBuf,
    app_version: Option<String>,
    clock: Clock,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("base", &self.base)
            .field("app_version", &self.app_version)
            .finish()
    }
}

impl CacheStore {
    /// Create a store rooted at `base`. The directory is created lazily.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            app_version: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// A store under the system temporary directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("horizon-request-cache"))
    }

    /// Stamp entries with an application version and reject entries from
    /// other versions.
    pub fn with_app_version(mut self, app_version: impl Into<String>) -> Self {
        self.app_version = Some(app_version.into());
        self
    }

    /// Replace the clock used for timestamps and expiry.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// The cache directory.
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// The application version stamped into entries.
    pub fn app_version(&self) -> Option<&str> {
        self.app_version.as_deref()
    }

    /// The current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Location of the entry for `fingerprint`.
    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.base.join(format!("{fingerprint}.{CACHE_EXTENSION}"))
    }

    /// Metadata for a new entry satisfying `expectation`, stamped now.
    pub fn metadata_for(&self, expectation: &CacheExpectation) -> CacheMetadata {
        CacheMetadata {
            cache_version: expectation.cache_version,
            sensitive_data: expectation.sensitive_data.clone(),
            app_version: self.app_version.clone(),
            created_at: self.now(),
            ttl_seconds: expectation.ttl_seconds,
        }
    }

    /// Read the entry for `fingerprint` if it satisfies `expectation`.
    pub fn load(
        &self,
        fingerprint: &str,
        expectation: &CacheExpectation,
    ) -> Result<CachedPayload, CacheErrorKind> {
        if expectation.ttl_seconds <= 0 {
            return Err(CacheErrorKind::InvalidCacheTime);
        }

        let file = self
            .read_file(fingerprint)
            .ok_or(CacheErrorKind::InvalidMetadata)?;
        let metadata = file.metadata;

        let age = self.now().signed_duration_since(metadata.created_at);
        if age.num_seconds() >= expectation.ttl_seconds {
            return Err(CacheErrorKind::Expired);
        }
        if metadata.cache_version != expectation.cache_version {
            return Err(CacheErrorKind::VersionMismatch);
        }
        if metadata.sensitive_data != expectation.sensitive_data {
            return Err(CacheErrorKind::SensitiveDataMismatch);
        }
        if metadata.app_version != self.app_version {
            return Err(CacheErrorKind::AppVersionMismatch);
        }

        let data = BASE64
            .decode(file.payload.as_bytes())
            .map_err(|_| CacheErrorKind::InvalidCacheData)?;

        Ok(CachedPayload {
            data: Bytes::from(data),
            metadata,
        })
    }

    /// Read only the metadata of an entry, without validity checks.
    pub fn metadata(&self, fingerprint: &str) -> Option<CacheMetadata> {
        self.read_file(fingerprint).map(|file| file.metadata)
    }

    fn read_file(&self, fingerprint: &str) -> Option<CacheFile> {
        let path = self.path_for(fingerprint);
        let contents = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<CacheFile>(&contents) {
            Ok(file) if file.schema_version == CACHE_SCHEMA_VERSION => Some(file),
            Ok(file) => {
                tracing::debug!(
                    target: targets::CACHE,
                    path = %path.display(),
                    schema_version = file.schema_version,
                    "unknown cache schema"
                );
                None
            }
            Err(e) => {
                tracing::debug!(
                    target: targets::CACHE,
                    path = %path.display(),
                    error = %e,
                    "unreadable cache entry"
                );
                None
            }
        }
    }

    /// Write `payload` for `fingerprint`, replacing any existing entry.
    pub fn save(
        &self,
        fingerprint: &str,
        payload: &[u8],
        metadata: &CacheMetadata,
    ) -> Result<(), CacheWriteError> {
        std::fs::create_dir_all(&self.base)?;

        let file = CacheFile {
            schema_version: CACHE_SCHEMA_VERSION,
            metadata: metadata.clone(),
            payload: BASE64.encode(payload),
        };
        let encoded = serde_json::to_vec(&file)?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.base)?;
        temp.write_all(&encoded)?;
        temp.as_file().sync_all()?;
        temp.persist(self.path_for(fingerprint))?;

        tracing::trace!(
            target: targets::CACHE,
            fingerprint,
            bytes = payload.len(),
            "cache entry written"
        );
        Ok(())
    }

    /// Delete the entry for `fingerprint`. Missing entries are not an error.
    pub fn remove(&self, fingerprint: &str) -> std::io::Result<()> {
        match std::fs::remove_file(self.path_for(fingerprint)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Delete every entry. Returns the number of entries removed.
    pub fn clear(&self) -> std::io::Result<usize> {
        let entries = match std::fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == CACHE_EXTENSION) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        tracing::debug!(target: targets::CACHE, removed, "cache cleared");
        Ok(removed)
    }
}

/// Derive the cache fingerprint of a request.
///
/// `argument` should already have passed through the request's cache file
/// name filter.
pub fn fingerprint(method: HttpMethod, host: &str, url: &str, argument: &Value) -> String {
    let argument = match argument {
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let key = format!("Method:{method} Host:{host} Url:{url} Argument:{argument}");
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let host = "https://api.example.com";
        let a = fingerprint(HttpMethod::Get, host, "/users", &json!({"page": 1}));
        let b = fingerprint(HttpMethod::Get, host, "/users", &json!({"page": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let other = fingerprint(HttpMethod::Post, host, "/users", &json!({"page": 1}));
        assert_ne!(a, other);
    }

    #[test]
    fn test_invalid_cache_time_checked_first() {
        let store = CacheStore::new("/nonexistent/horizon");
        assert_eq!(
            store.load("missing", &CacheExpectation::new(-1)),
            Err(CacheErrorKind::InvalidCacheTime)
        );
        assert_eq!(
            store.load("missing", &CacheExpectation::new(10)),
            Err(CacheErrorKind::InvalidMetadata)
        );
    }

    #[test]
    fn test_unknown_schema_is_invalid_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let metadata = store.metadata_for(&CacheExpectation::new(60));
        store.save("fp", b"data", &metadata).unwrap();

        let path = store.path_for("fp");
        let mut raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        raw["schema_version"] = json!(99);
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert_eq!(
            store.load("fp", &CacheExpectation::new(60)),
            Err(CacheErrorKind::InvalidMetadata)
        );
    }

    #[test]
    fn test_corrupt_payload_is_invalid_cache_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let metadata = store.metadata_for(&CacheExpectation::new(60));
        store.save("fp", b"data", &metadata).unwrap();

        let path = store.path_for("fp");
        let mut raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        raw["payload"] = json!("***not base64***");
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert_eq!(
            store.load("fp", &CacheExpectation::new(60)),
            Err(CacheErrorKind::InvalidCacheData)
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("nested"));
        assert_eq!(store.clear().unwrap(), 0);

        let metadata = store.metadata_for(&CacheExpectation::new(60));
        store.save("a", b"1", &metadata).unwrap();
        store.save("b", b"2", &metadata).unwrap();
        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert!(!store.path_for("a").exists());
        assert_eq!(store.clear().unwrap(), 1);
    }
}
