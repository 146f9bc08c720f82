//! Local-file durable store
//!
//! One file per entry under `<base>/<cache_id>/<hh>/<hash>.bin`, where
//! `hash` is the hex SHA-256 of the key's textual form and `hh` its first
//! two characters (squid-style fanout, keeps directories small). Records
//! are bincode-encoded and written to a temp file then renamed, so readers
//! never observe a partial write. Corrupt records are treated as misses
//! and removed.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use arrayvec::ArrayString;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{expiry_to_unix_nanos, unix_nanos_to_expiry, PersistStore};
use crate::cache::config::{self, MAX_CACHE_ID_LEN};
use crate::cache::error::CacheError;
use crate::cache::tier::memory::unix_nanos_now;
use crate::cache::traits::{CacheKey, CacheValue};

/// Longest accepted textual key, in bytes.
const MAX_KEY_LEN: usize = 127;

const RECORD_EXT: &str = "bin";

/// On-disk record layout. The write side borrows, the read side owns; both
/// must keep the same field order.
#[derive(Serialize)]
struct RecordRef<'a, V> {
    key: &'a str,
    value: &'a V,
    expiry_unix_nanos: i64,
    updated_at_unix_nanos: i64,
}

#[derive(Deserialize)]
struct Record<V> {
    key: String,
    value: V,
    expiry_unix_nanos: i64,
    #[allow(dead_code)]
    updated_at_unix_nanos: i64,
}

/// File-backed [`PersistStore`] rooted in the platform cache directory.
pub struct LocalFsStore<K, V> {
    dir: PathBuf,
    cache_id: ArrayString<MAX_CACHE_ID_LEN>,
    /// Fanout directories already created, to skip the mkdir syscall.
    subdirs: DashMap<PathBuf, ()>,
    /// Disambiguates temp files when the same key is written concurrently.
    tmp_counter: AtomicU64,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> LocalFsStore<K, V>
where
    K: CacheKey,
    V: CacheValue + Serialize + DeserializeOwned,
{
    /// Open (creating if needed) the store for `cache_id` under the
    /// platform cache directory.
    pub fn new(cache_id: &str) -> Result<Self, CacheError> {
        Self::with_base_dir(cache_id, config::default_cache_root())
    }

    /// Open the store under an explicit base directory. Probes that the
    /// directory is writable so misconfiguration surfaces at build time,
    /// not on the first write.
    pub fn with_base_dir(cache_id: &str, base_dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        config::validate_cache_id(cache_id)?;
        let cache_id_arr = ArrayString::from(cache_id)
            .map_err(|_| CacheError::invalid_cache_id("cache ID too long"))?;

        let dir = base_dir.as_ref().join(cache_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| CacheError::io(format!("create {}: {}", dir.display(), e)))?;

        let probe = dir.join(".write_probe");
        std::fs::write(&probe, b"probe")
            .map_err(|e| CacheError::io(format!("cache dir not writable: {}", e)))?;
        let _ = std::fs::remove_file(&probe);

        Ok(LocalFsStore {
            dir,
            cache_id: cache_id_arr,
            subdirs: DashMap::new(),
            tmp_counter: AtomicU64::new(0),
            _marker: PhantomData,
        })
    }

    /// Namespace this store was opened with.
    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    /// Root directory holding this store's records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &K) -> PathBuf {
        let digest = Sha256::digest(key.to_string().as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.dir
            .join(&hex[..2])
            .join(format!("{}.{}", hex, RECORD_EXT))
    }

    async fn ensure_subdir(&self, path: &Path) -> Result<(), CacheError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if self.subdirs.contains_key(parent) {
            return Ok(());
        }
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CacheError::io(format!("create {}: {}", parent.display(), e)))?;
        self.subdirs.insert(parent.to_path_buf(), ());
        Ok(())
    }

    /// All record files currently on disk, walking the two-level fanout.
    async fn record_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut outer = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| CacheError::io(format!("read {}: {}", self.dir.display(), e)))?;

        while let Some(entry) = outer
            .next_entry()
            .await
            .map_err(|e| CacheError::io(format!("walk {}: {}", self.dir.display(), e)))?
        {
            let subdir = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let mut inner = match tokio::fs::read_dir(&subdir).await {
                Ok(rd) => rd,
                Err(e) => {
                    log::warn!("skipping unreadable {}: {}", subdir.display(), e);
                    continue;
                }
            };
            while let Some(file) = inner
                .next_entry()
                .await
                .map_err(|e| CacheError::io(format!("walk {}: {}", subdir.display(), e)))?
            {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    async fn read_record(&self, path: &Path) -> Result<Option<Record<V>>, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(format!("read {}: {}", path.display(), e))),
        };
        match bincode::serde::decode_from_slice(&bytes, bincode::config::standard()) {
            Ok((record, _)) => Ok(Some(record)),
            Err(e) => {
                log::warn!("removing corrupt record {}: {}", path.display(), e);
                let _ = tokio::fs::remove_file(path).await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<K, V> PersistStore<K, V> for LocalFsStore<K, V>
where
    K: CacheKey,
    V: CacheValue + Serialize + DeserializeOwned,
{
    /// Keys must be non-empty, at most 127 bytes in textual form, and use
    /// only `[A-Za-z0-9._:-]`. The charset makes traversal sequences
    /// unrepresentable even before hashing.
    fn validate_key(&self, key: &K) -> Result<(), CacheError> {
        let text = key.to_string();
        if text.is_empty() {
            return Err(CacheError::invalid_key("key cannot be empty"));
        }
        if text.len() > MAX_KEY_LEN {
            return Err(CacheError::invalid_key(format!(
                "key too long: {} bytes (max {})",
                text.len(),
                MAX_KEY_LEN
            )));
        }
        for ch in text.chars() {
            if !ch.is_ascii_alphanumeric() && !matches!(ch, '-' | '_' | '.' | ':') {
                return Err(CacheError::invalid_key(format!(
                    "invalid character {:?} in key (alphanumeric, dash, underscore, period, colon allowed)",
                    ch
                )));
            }
        }
        Ok(())
    }

    async fn get(&self, key: &K) -> Result<Option<(V, Option<SystemTime>)>, CacheError> {
        let path = self.record_path(key);
        let Some(record) = self.read_record(&path).await? else {
            return Ok(None);
        };

        if record.key != key.to_string() {
            // A hash collision or tampered file; either way, not our record.
            log::warn!(
                "key mismatch in {}: stored {:?}",
                path.display(),
                record.key
            );
            return Ok(None);
        }

        if record.expiry_unix_nanos != 0 && unix_nanos_now() > record.expiry_unix_nanos {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some((
            record.value,
            unix_nanos_to_expiry(record.expiry_unix_nanos),
        )))
    }

    async fn set(&self, key: &K, value: &V, expiry: Option<SystemTime>) -> Result<(), CacheError> {
        let path = self.record_path(key);
        self.ensure_subdir(&path).await?;

        let key_text = key.to_string();
        let record = RecordRef {
            key: &key_text,
            value,
            expiry_unix_nanos: expiry_to_unix_nanos(expiry),
            updated_at_unix_nanos: unix_nanos_now(),
        };
        let bytes = bincode::serde::encode_to_vec(&record, bincode::config::standard())
            .map_err(CacheError::serialization)?;

        // Unique temp name, then rename: readers see old or new, never half.
        let tmp = path.with_extension(format!(
            "tmp{}",
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CacheError::io(format!("write {}: {}", tmp.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::io(format!("rename {}: {}", path.display(), e)));
        }
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), CacheError> {
        let path = self.record_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(format!("remove {}: {}", path.display(), e))),
        }
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize, CacheError> {
        let cutoff = expiry_to_unix_nanos(Some(SystemTime::now() - max_age));
        let mut removed = 0;
        for path in self.record_files().await? {
            let Some(record) = self.read_record(&path).await? else {
                continue;
            };
            if record.expiry_unix_nanos != 0 && record.expiry_unix_nanos < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => log::warn!("remove {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.record_files().await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("remove {}: {}", path.display(), e),
            }
        }
        self.subdirs.clear();
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.record_files().await?.len())
    }

    fn location(&self, key: &K) -> String {
        self.record_path(key).display().to_string()
    }

    async fn close(&self) -> Result<(), CacheError> {
        // Files need no teardown.
        Ok(())
    }
}
