//! Ephemeral, single-use token store.
//!
//! Used when a payload is too long for a URL: the payload is stored locally
//! under a short random token and the URL carries only `?token=…`. The first
//! successful [`TokenStore::take_once`] returns the payload and destroys the
//! entry; entries nobody reads are swept after a maximum age.
//!
//! Backends:
//! - [`memory::MemoryTokenStore`]: process-local `DashMap`
//! - [`file::FileTokenStore`]: one JSON file per token, shared between processes

pub mod file;
pub mod memory;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::ShareError;

// ---------------------------------------------------------------------------
// EphemeralEntry
// ---------------------------------------------------------------------------

/// One stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralEntry {
    pub token: String,
    /// Encoded payload, exactly as it would have appeared in `?content=`.
    pub payload: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub consumed: bool,
}

impl EphemeralEntry {
    pub fn new(token: String, payload: String) -> Self {
        Self {
            token,
            payload,
            created_at: now_millis(),
            consumed: false,
        }
    }

    pub fn age(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.created_at))
    }

    /// Whether a sweep at `now` must remove this entry.
    pub fn is_stale(&self, now: u64, max_age: Duration) -> bool {
        self.consumed || self.age(now) > max_age
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Storage behind `?token=` links.
///
/// `take_once` must be an atomic read-then-delete: of any number of calls
/// with the same token, concurrent or not, at most one sees the payload.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store `payload` and return the token that retrieves it.
    async fn put(&self, payload: String) -> Result<String, ShareError>;

    /// Return the payload for `token` and destroy the entry. `None` when the
    /// token is unknown, already used or expired.
    async fn take_once(&self, token: &str) -> Result<Option<String>, ShareError>;

    /// Remove consumed and expired entries. Returns how many were removed.
    async fn sweep(&self) -> Result<usize, ShareError>;

    /// Number of live entries.
    async fn len(&self) -> Result<usize, ShareError>;

    async fn is_empty(&self) -> Result<bool, ShareError> {
        Ok(self.len().await? == 0)
    }
}

/// [`TokenStore::take_once`] with a miss turned into [`ShareError::StoreMiss`].
pub async fn take_required(store: &dyn TokenStore, token: &str) -> Result<String, ShareError> {
    store
        .take_once(token)
        .await?
        .ok_or_else(|| ShareError::StoreMiss(token.to_string()))
}

// ---------------------------------------------------------------------------
// Background sweeper
// ---------------------------------------------------------------------------

/// Handle to a running sweeper task. Dropping it stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Sweep `store` every `every` on the current tokio runtime.
pub fn spawn_sweeper(store: Arc<dyn TokenStore>, every: Duration) -> SweeperHandle {
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            match store.sweep().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "swept ephemeral entries"),
                Err(e) => tracing::warn!(error = %e, "ephemeral store sweep failed"),
            }
        }
    });
    SweeperHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_staleness() {
        let mut entry = EphemeralEntry {
            token: "abc".into(),
            payload: "p".into(),
            created_at: 1_000,
            consumed: false,
        };
        let max_age = Duration::from_secs(1);
        assert!(!entry.is_stale(1_500, max_age));
        assert!(!entry.is_stale(2_000, max_age));
        assert!(entry.is_stale(2_001, max_age));
        entry.consumed = true;
        assert!(entry.is_stale(1_000, max_age));
    }

    #[test]
    fn age_never_underflows() {
        let entry = EphemeralEntry {
            token: "abc".into(),
            payload: String::new(),
            created_at: 5_000,
            consumed: false,
        };
        assert_eq!(entry.age(1_000), Duration::ZERO);
    }

    #[test]
    fn entry_json_shape() {
        let entry = EphemeralEntry::new("tok".into(), "payload".into());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["token"], "tok");
        assert_eq!(json["consumed"], false);
        assert!(json["createdAt"].as_u64().unwrap() > 0);
    }
}
