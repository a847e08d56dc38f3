// src/storage/memory.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{ItemFilter, ItemStore, Page, StoredItem, UpsertOutcome};
use crate::error::StorageError;
use crate::ingest::types::{AssetRef, Fingerprint, Item};

/// In-process store. Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<Fingerprint, StoredItem>,
    /// `(source_id, guid)` of every stored item that has a guid.
    guids: HashMap<(String, String), Fingerprint>,
}

impl Inner {
    fn existing(&self, item: &Item) -> Option<Fingerprint> {
        if self.items.contains_key(&item.fingerprint) {
            return Some(item.fingerprint.clone());
        }
        let guid = item.guid.as_ref()?;
        self.guids
            .get(&(item.source_id.clone(), guid.clone()))
            .cloned()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.items.is_empty()
    }
}

fn sort_newest_first(items: &mut [StoredItem]) {
    items.sort_by(|a, b| {
        b.item
            .published_at
            .cmp(&a.item.published_at)
            .then_with(|| a.item.fingerprint.cmp(&b.item.fingerprint))
    });
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn upsert_item(&self, item: &Item) -> Result<UpsertOutcome, StorageError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        if let Some(fp) = inner.existing(item) {
            if let Some(stored) = inner.items.get_mut(&fp) {
                stored.last_seen_at = now;
            }
            return Ok(UpsertOutcome::Refreshed);
        }

        if let Some(guid) = &item.guid {
            inner
                .guids
                .insert((item.source_id.clone(), guid.clone()), item.fingerprint.clone());
        }
        inner.items.insert(
            item.fingerprint.clone(),
            StoredItem {
                item: item.clone(),
                first_seen_at: now,
                last_seen_at: now,
            },
        );
        Ok(UpsertOutcome::Inserted)
    }

    async fn has_fingerprint(&self, fp: &Fingerprint) -> Result<bool, StorageError> {
        Ok(self.inner.read().await.items.contains_key(fp))
    }

    async fn get_item(&self, fp: &Fingerprint) -> Result<Option<StoredItem>, StorageError> {
        Ok(self.inner.read().await.items.get(fp).cloned())
    }

    async fn update_asset(&self, asset: &AssetRef) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .items
            .get_mut(&asset.fingerprint)
            .ok_or_else(|| StorageError::Unavailable(format!("no item {}", asset.fingerprint)))?;
        match stored.item.assets.iter_mut().find(|a| a.url == asset.url) {
            Some(slot) => {
                slot.status = asset.status;
                slot.local_path = asset.local_path.clone();
                Ok(())
            }
            None => Err(StorageError::Unavailable(format!(
                "no asset {} on item {}",
                asset.url, asset.fingerprint
            ))),
        }
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        page: Page,
    ) -> Result<Vec<StoredItem>, StorageError> {
        let mut hits: Vec<StoredItem> = self
            .inner
            .read()
            .await
            .items
            .values()
            .filter(|s| filter.matches(&s.item))
            .cloned()
            .collect();
        sort_newest_first(&mut hits);
        Ok(hits.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn count_items(&self, filter: &ItemFilter) -> Result<usize, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .items
            .values()
            .filter(|s| filter.matches(&s.item))
            .count())
    }
}
