//! Content-addressed cache for raw fetch payloads.
//!
//! Payload bytes live under `cas/sha256/aa/bb/<hex>`; a per-(source, window)
//! index entry records the digest and fetch time. Entries are append-only:
//! `put` never rewrites an existing payload, and index writes go through a
//! temp file + rename so a cancelled run leaves either a whole entry or none.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::common::error::{PipelineError, Result};
use crate::domain::TimeWindow;
use crate::observability::metrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub sha256: String,
    pub fetched_at: DateTime<Utc>,
    pub bytes_len: u64,
}

pub struct FetchCache {
    root: PathBuf,
    // Per-key guards serializing the caller's check-then-fetch sequence.
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FetchCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Guard for one (source, window) key. Connectors hold this across their
    /// cache check → fetch → cache write critical section.
    pub fn lock_for(&self, source_id: &str, window: &TimeWindow) -> Arc<Mutex<()>> {
        let key = format!("{source_id}/{}", window.key());
        let mut locks = self.locks.lock().expect("cache lock map poisoned");
        locks.entry(key).or_default().clone()
    }

    /// Returns the cached payload for the key, or `None` on a miss.
    pub fn get(&self, source_id: &str, window: &TimeWindow) -> Result<Option<Vec<u8>>> {
        let index = self.index_path(source_id, window);
        let raw = match fs::read_to_string(&index) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                metrics::cache::miss();
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry = serde_json::from_str(&raw)?;
        let payload = fs::read(self.payload_path(&entry.sha256))?;
        let digest = sha256_hex(&payload);
        if digest != entry.sha256 {
            return Err(PipelineError::Cache {
                message: format!(
                    "payload digest mismatch for {source_id}/{}: index {} vs {}",
                    window.key(),
                    entry.sha256,
                    digest
                ),
            });
        }
        metrics::cache::hit();
        Ok(Some(payload))
    }

    /// Stores a payload for the key. Last writer wins on the index entry;
    /// the payload itself is deduplicated by digest.
    pub fn put(&self, source_id: &str, window: &TimeWindow, payload: &[u8]) -> Result<CacheEntry> {
        let digest = sha256_hex(payload);
        let payload_path = self.payload_path(&digest);
        if !payload_path.exists() {
            let dir = payload_path.parent().expect("payload path has parent");
            fs::create_dir_all(dir)?;
            write_atomic(&payload_path, payload)?;
        }

        let entry = CacheEntry {
            sha256: digest,
            fetched_at: Utc::now(),
            bytes_len: payload.len() as u64,
        };
        let index = self.index_path(source_id, window);
        fs::create_dir_all(index.parent().expect("index path has parent"))?;
        write_atomic(&index, serde_json::to_vec_pretty(&entry)?.as_slice())?;
        debug!(source_id, window = %window.key(), sha256 = %entry.sha256, "cached payload");
        metrics::cache::write();
        Ok(entry)
    }

    fn index_path(&self, source_id: &str, window: &TimeWindow) -> PathBuf {
        self.root
            .join("index")
            .join(source_id)
            .join(format!("{}.json", window.key()))
    }

    fn payload_path(&self, hex_digest: &str) -> PathBuf {
        self.root
            .join("cas")
            .join("sha256")
            .join(&hex_digest[0..2])
            .join(&hex_digest[2..4])
            .join(hex_digest)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
