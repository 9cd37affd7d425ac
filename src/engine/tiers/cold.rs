// ── Engine: Cold tier ──────────────────────────────────────────────────────
// Effectively unlimited archive on the filesystem. One blob file per key,
// sharded two levels deep by the key's SHA-256 so a single directory never
// balloons. Writes go through a temp file + rename so readers never observe
// a partial blob. Nothing expires here — removal is explicit delete only.

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{Entry, Tier};
use crate::engine::tiers::TierStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct FsColdStore {
    root: PathBuf,
}

impl FsColdStore {
    pub fn open(root: &Path) -> CoreResult<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| CoreError::tier_unavailable(Tier::Cold, e.to_string()))?;
        Ok(FsColdStore { root: root.to_path_buf() })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.root.join(&hex[0..2]).join(&hex[2..4]).join(hex)
    }

    fn unavailable(e: std::io::Error) -> CoreError {
        CoreError::tier_unavailable(Tier::Cold, e.to_string())
    }
}

#[async_trait]
impl TierStore for FsColdStore {
    fn tier(&self) -> Tier {
        Tier::Cold
    }

    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        match std::fs::read(self.blob_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::unavailable(e)),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> CoreResult<()> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Self::unavailable)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value).map_err(Self::unavailable)?;
        std::fs::rename(&tmp, &path).map_err(Self::unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        match std::fs::remove_file(self.blob_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::unavailable(e)),
        }
    }

    async fn describe(&self, key: &str) -> CoreResult<Option<Entry>> {
        let path = self.blob_path(key);
        let value = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::unavailable(e)),
        };
        let meta = std::fs::metadata(&path).map_err(Self::unavailable)?;
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        // Creation time is not available on every filesystem
        let created = meta.created().map(DateTime::<Utc>::from).unwrap_or(modified);
        Ok(Some(Entry {
            key: key.to_string(),
            size_bytes: value.len() as u64,
            tier: Tier::Cold,
            created_at: created,
            last_accessed_at: modified,
            value,
        }))
    }
}
