//! # File Cache
//!
//! Persistent tier. Each entry is one file, `{dir}/{fp[..2]}/{fp}.entry`:
//!
//! ```text
//! "GFC1" | u32 BE metadata length | metadata JSON | payload
//! ```
//!
//! Entries are written under a unique temporary name and renamed into place,
//! so a reader sees either the previous entry or the new one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::fs;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::cache::types::{CacheEntry, CacheMetadata, CacheResult, now_ms};
use crate::request::Fingerprint;

use super::CacheProvider;

const MAGIC: &[u8; 4] = b"GFC1";
const HEADER_LEN: usize = 8;
const MAX_METADATA_LEN: usize = 64 * 1024;
const ENTRY_EXTENSION: &str = "entry";
const TEMP_EXTENSION: &str = "tmp";
/// Temporary files older than this are leftovers of interrupted writes
const STALE_TEMP_AGE: Duration = Duration::from_secs(3600);

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn encode_entry(entry: &CacheEntry) -> io::Result<Vec<u8>> {
    let metadata = serde_json::to_vec(&entry.metadata).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize metadata: {e}"),
        )
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + metadata.len() + entry.payload.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(metadata.len() as u32).to_be_bytes());
    buf.extend_from_slice(&metadata);
    buf.extend_from_slice(&entry.payload);
    Ok(buf)
}

/// Length of the metadata block, if the header is well-formed
fn metadata_len(header: &[u8]) -> Option<usize> {
    if header.len() < HEADER_LEN || &header[..4] != MAGIC {
        return None;
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    (len <= MAX_METADATA_LEN).then_some(len)
}

fn decode_entry(bytes: Bytes) -> Option<CacheEntry> {
    let len = metadata_len(&bytes)?;
    let payload_start = HEADER_LEN.checked_add(len)?;
    let metadata: CacheMetadata =
        serde_json::from_slice(bytes.get(HEADER_LEN..payload_start)?).ok()?;
    let payload = bytes.slice(payload_start..);
    Some(CacheEntry { payload, metadata })
}

/// Read only the metadata block of an entry file
async fn read_metadata(path: &Path) -> io::Result<Option<CacheMetadata>> {
    let mut file = fs::File::open(path).await?;
    let mut header = [0u8; HEADER_LEN];
    match file.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let Some(len) = metadata_len(&header) else {
        return Ok(None);
    };
    let mut metadata = vec![0u8; len];
    match file.read_exact(&mut metadata).await {
        Ok(_) => Ok(serde_json::from_slice(&metadata).ok()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            warn!(path = ?path, error = %e, "Failed to remove cache file");
        }
        _ => {}
    }
}

/// A live entry found while scanning the cache directory
struct ScannedEntry {
    path: PathBuf,
    created_at_ms: u64,
    len: u64,
}

#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
    /// Upper bound enforced by `sweep`; zero means unbounded
    max_size: u64,
    initialized: Arc<AtomicBool>,
}

impl FileCache {
    /// Create a new file cache with the specified directory
    pub fn new(cache_dir: PathBuf, max_size: u64) -> Self {
        Self {
            cache_dir,
            max_size,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Create the cache directory
    pub(crate) async fn ensure_initialized(&self) -> io::Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        fs::create_dir_all(&self.cache_dir).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn shard_dir(&self, key: &Fingerprint) -> PathBuf {
        self.cache_dir.join(&key.as_str()[..2])
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.shard_dir(key)
            .join(format!("{}.{ENTRY_EXTENSION}", key.as_str()))
    }

    fn temp_path(&self, key: &Fingerprint) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.shard_dir(key).join(format!(
            ".{}.{}.{seq}.{TEMP_EXTENSION}",
            key.as_str(),
            std::process::id()
        ))
    }

    async fn write_atomically(&self, key: &Fingerprint, contents: &[u8]) -> io::Result<()> {
        let final_path = self.entry_path(key);
        let temp_path = self.temp_path(key);

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &final_path).await
        }
        .await;

        if let Err(e) = written {
            warn!(path = ?final_path, error = %e, "Failed to write cache entry");
            remove_quietly(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    /// Walk every shard, dropping expired, corrupt and stale temporary files
    async fn scan(&self, removed: &mut usize) -> io::Result<Vec<ScannedEntry>> {
        let now = now_ms();
        let mut live = Vec::new();

        let mut shards = match fs::read_dir(&self.cache_dir).await {
            Ok(shards) => shards,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(live),
            Err(e) => return Err(e),
        };

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                let file_meta = file.metadata().await?;

                match path.extension().and_then(|e| e.to_str()) {
                    Some(TEMP_EXTENSION) => {
                        let age = file_meta
                            .modified()
                            .ok()
                            .and_then(|m| SystemTime::now().duration_since(m).ok())
                            .unwrap_or_default();
                        if age > STALE_TEMP_AGE {
                            remove_quietly(&path).await;
                            *removed += 1;
                        }
                    }
                    Some(ENTRY_EXTENSION) => match read_metadata(&path).await {
                        Ok(Some(metadata)) if !metadata.is_expired_at(now) => {
                            live.push(ScannedEntry {
                                path,
                                created_at_ms: metadata.created_at_ms,
                                len: file_meta.len(),
                            });
                        }
                        Ok(_) => {
                            remove_quietly(&path).await;
                            *removed += 1;
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    },
                    _ => {}
                }
            }
        }
        Ok(live)
    }
}

#[async_trait::async_trait]
impl CacheProvider for FileCache {
    async fn contains(&self, key: &Fingerprint) -> CacheResult<bool> {
        match read_metadata(&self.entry_path(key)).await {
            Ok(Some(metadata)) => Ok(!metadata.is_expired()),
            Ok(None) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, key: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read cache entry");
                return Err(e);
            }
        };

        let entry = match decode_entry(bytes) {
            Some(entry) if entry.verify() => entry,
            _ => {
                warn!(fingerprint = %key.short(), path = ?path, "Corrupt cache entry, removing");
                remove_quietly(&path).await;
                return Ok(None);
            }
        };

        if entry.metadata.is_expired() {
            debug!(fingerprint = %key.short(), "File cache entry expired");
            remove_quietly(&path).await;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    async fn put(&self, key: Fingerprint, entry: CacheEntry) -> CacheResult<()> {
        self.ensure_initialized().await?;
        fs::create_dir_all(self.shard_dir(&key)).await?;

        let contents = encode_entry(&entry)?;
        self.write_atomically(&key, &contents).await?;

        debug!(
            fingerprint = %key.short(),
            size = entry.metadata.size,
            "Cached entry to file"
        );
        Ok(())
    }

    async fn invalidate(&self, key: &Fingerprint) -> CacheResult<()> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(_) => {
                debug!(fingerprint = %key.short(), "Removed entry from file cache");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(fingerprint = %key.short(), error = %e, "Failed to remove cache entry");
                Err(e)
            }
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                warn!(dir = ?self.cache_dir, error = %e, "Failed to read cache directory");
                return Err(e);
            }
        };

        let mut shard_count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                if let Err(e) = fs::remove_dir_all(&path).await {
                    warn!(path = ?path, error = %e, "Failed to remove cache shard");
                } else {
                    shard_count += 1;
                }
            }
        }

        debug!(count = shard_count, "Cleared file cache shards");
        Ok(())
    }

    async fn sweep(&self) -> CacheResult<usize> {
        let mut removed = 0;
        let mut live = self.scan(&mut removed).await?;

        let mut total: u64 = live.iter().map(|e| e.len).sum();
        if self.max_size > 0 && total > self.max_size {
            // Oldest first
            live.sort_by_key(|e| e.created_at_ms);
            for entry in live {
                if total <= self.max_size {
                    break;
                }
                remove_quietly(&entry.path).await;
                total = total.saturating_sub(entry.len);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(count = removed, remaining_bytes = total, "Swept file cache");
        }
        Ok(removed)
    }
}
