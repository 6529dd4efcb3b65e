//! Process-local token store backed by a `DashMap`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{now_millis, EphemeralEntry, TokenStore};
use crate::utils::generate_token;
use crate::{ShareError, ShareSettings};

/// Thread-safe in-memory token store. Clones share the same entries.
#[derive(Debug, Clone)]
pub struct MemoryTokenStore {
    entries: Arc<DashMap<String, EphemeralEntry>>,
    max_age: Duration,
    token_length: usize,
}

impl MemoryTokenStore {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_age,
            token_length: 8,
        }
    }

    pub fn from_settings(settings: &ShareSettings) -> Self {
        Self::new(settings.store_max_age).with_token_length(settings.token_length)
    }

    pub fn with_token_length(mut self, token_length: usize) -> Self {
        self.token_length = token_length;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn sweep_at(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_stale(now, self.max_age));
        before.saturating_sub(self.entries.len())
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::from_settings(&ShareSettings::default())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, payload: String) -> Result<String, ShareError> {
        let token = generate_token(self.token_length);
        tracing::debug!(%token, len = payload.len(), "stored ephemeral payload");
        self.entries
            .insert(token.clone(), EphemeralEntry::new(token.clone(), payload));
        Ok(token)
    }

    async fn take_once(&self, token: &str) -> Result<Option<String>, ShareError> {
        // `remove` is the single atomic step: whoever removes the entry owns it.
        let Some((_, mut entry)) = self.entries.remove(token) else {
            tracing::debug!(%token, "token not found");
            return Ok(None);
        };
        if entry.is_stale(now_millis(), self.max_age) {
            tracing::debug!(%token, "token expired");
            return Ok(None);
        }
        entry.consumed = true;
        Ok(Some(entry.payload))
    }

    async fn sweep(&self) -> Result<usize, ShareError> {
        Ok(self.sweep_at(now_millis()))
    }

    async fn len(&self) -> Result<usize, ShareError> {
        Ok(self.entries.len())
    }
}
