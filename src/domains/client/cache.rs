//! Tool list cache.
//!
//! The cached entry is only ever replaced as a whole, so readers see either
//! the previous snapshot or the new one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::core::protocol::ToolDescriptor;

/// A snapshot of the server's tool list.
#[derive(Debug, Clone)]
pub struct ToolListCacheEntry {
    tools: Arc<[ToolDescriptor]>,
    fresh: bool,
    fetched_at: DateTime<Utc>,
}

impl ToolListCacheEntry {
    fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools: tools.into(),
            fresh: true,
            fetched_at: Utc::now(),
        }
    }

    pub fn tools(&self) -> &Arc<[ToolDescriptor]> {
        &self.tools
    }

    /// False once the session reconnected or the cache was invalidated.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

#[derive(Debug, Default)]
pub(crate) struct ToolListCache {
    entry: RwLock<Option<Arc<ToolListCacheEntry>>>,
}

impl ToolListCache {
    /// The cached tools, if an entry exists and is fresh.
    pub async fn fresh(&self) -> Option<Arc<[ToolDescriptor]>> {
        self.entry
            .read()
            .await
            .as_ref()
            .filter(|entry| entry.fresh)
            .map(|entry| Arc::clone(&entry.tools))
    }

    pub async fn snapshot(&self) -> Option<Arc<ToolListCacheEntry>> {
        self.entry.read().await.clone()
    }

    /// Replace the entry. It is fresh only if `is_current` holds while the
    /// write lock is held.
    pub async fn store(
        &self,
        tools: Vec<ToolDescriptor>,
        is_current: impl FnOnce() -> bool,
    ) -> Arc<[ToolDescriptor]> {
        let mut slot = self.entry.write().await;
        let mut entry = ToolListCacheEntry::new(tools);
        entry.fresh = is_current();
        let tools = Arc::clone(&entry.tools);
        *slot = Some(Arc::new(entry));
        tools
    }

    /// Replace the entry with a stale copy.
    pub async fn mark_stale(&self) {
        let mut entry = self.entry.write().await;
        if let Some(current) = entry.as_ref() {
            let stale = ToolListCacheEntry {
                fresh: false,
                ..ToolListCacheEntry::clone(current)
            };
            *entry = Some(Arc::new(stale));
        }
    }
}
