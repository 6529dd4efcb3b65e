//! Directory-backed token store.
//!
//! Layout: one `<token>.json` file per entry, holding a serialized
//! [`EphemeralEntry`]. Several processes may share the directory; a take is
//! claimed by renaming the entry file to a private name first, so only one of
//! any number of racing readers gets it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;

use super::{now_millis, EphemeralEntry, TokenStore};
use crate::utils::{generate_token, is_valid_token};
use crate::{ShareError, ShareSettings};

const ENTRY_EXT: &str = "json";
const CLAIM_MARKER: &str = ".claim-";
const TMP_MARKER: &str = ".tmp-";

#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
    max_age: Duration,
    token_length: usize,
}

impl FileTokenStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>, max_age: Duration) -> Result<Self, ShareError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            max_age,
            token_length: 8,
        })
    }

    pub async fn from_settings(
        dir: impl Into<PathBuf>,
        settings: &ShareSettings,
    ) -> Result<Self, ShareError> {
        Ok(Self::open(dir, settings.store_max_age)
            .await?
            .with_token_length(settings.token_length))
    }

    pub fn with_token_length(mut self, token_length: usize) -> Self {
        self.token_length = token_length;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{token}.{ENTRY_EXT}"))
    }

    fn scratch_path(&self, token: &str, marker: &str) -> PathBuf {
        self.dir.join(format!("{token}{marker}{}", generate_token(8)))
    }

    async fn sweep_at(&self, now: u64) -> Result<usize, ShareError> {
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let stale = if name.contains(CLAIM_MARKER) || name.contains(TMP_MARKER) {
                // Left behind by a reader or writer that died mid-operation.
                is_abandoned(&path, self.max_age).await
            } else if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
                match read_entry(&path).await {
                    Ok(Some(entry)) => entry.is_stale(now, self.max_age),
                    Ok(None) => false,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "removing unreadable entry");
                        true
                    }
                }
            } else {
                false
            };

            if stale && remove_if_present(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn put(&self, payload: String) -> Result<String, ShareError> {
        let token = generate_token(self.token_length);
        let entry = EphemeralEntry::new(token.clone(), payload);
        let json = serde_json::to_vec(&entry)?;

        // Write beside the final name, then rename so readers never see a
        // partial file.
        let tmp = self.scratch_path(&token, TMP_MARKER);
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, self.entry_path(&token)).await?;

        tracing::debug!(%token, dir = %self.dir.display(), "stored ephemeral payload");
        Ok(token)
    }

    async fn take_once(&self, token: &str) -> Result<Option<String>, ShareError> {
        if !is_valid_token(token) {
            tracing::debug!(%token, "rejecting malformed token");
            return Ok(None);
        }

        let claim = self.scratch_path(token, CLAIM_MARKER);
        match fs::rename(self.entry_path(token), &claim).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let raw = fs::read(&claim).await;
        if let Err(e) = fs::remove_file(&claim).await {
            tracing::warn!(path = %claim.display(), error = %e, "failed to remove claimed entry");
        }
        let mut entry: EphemeralEntry = serde_json::from_slice(&raw?)?;

        if entry.is_stale(now_millis(), self.max_age) {
            tracing::debug!(%token, "token expired");
            return Ok(None);
        }
        entry.consumed = true;
        Ok(Some(entry.payload))
    }

    async fn sweep(&self) -> Result<usize, ShareError> {
        self.sweep_at(now_millis()).await
    }

    async fn len(&self) -> Result<usize, ShareError> {
        let mut count = 0;
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// `Ok(None)` when another process took the file first.
async fn read_entry(path: &Path) -> Result<Option<EphemeralEntry>, ShareError> {
    match fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, ShareError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn is_abandoned(path: &Path, max_age: Duration) -> bool {
    let Ok(meta) = fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .is_some_and(|age| age > max_age)
}
