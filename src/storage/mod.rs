// src/storage/mod.rs
//! Durable item storage, the asset blob area and the Markdown export.

pub mod assets;
pub mod markdown;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use assets::AssetArea;
pub use markdown::MarkdownExporter;
pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageError;
use crate::ingest::types::{AssetRef, Fingerprint, Item};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting; item and asset rows written.
    Inserted,
    /// Already stored (by fingerprint or by source guid); only
    /// `last_seen_at` moved.
    Refreshed,
}

/// An item as persisted, with bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredItem {
    pub item: Item,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Read-path filter. Bounds are `[published_after, published_before)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub source_id: Option<String>,
    pub category: Option<String>,
    pub published_after: Option<DateTime<Utc>>,
    pub published_before: Option<DateTime<Utc>>,
}

impl ItemFilter {
    pub fn source(id: impl Into<String>) -> Self {
        Self {
            source_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        if self.source_id.as_deref().is_some_and(|s| s != item.source_id) {
            return false;
        }
        if self.category.as_deref().is_some_and(|c| c != item.category) {
            return false;
        }
        if self.published_after.is_some_and(|t| item.published_at < t) {
            return false;
        }
        if self.published_before.is_some_and(|t| item.published_at >= t) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
        }
    }
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// Persistence contract shared by the ingestion core (write side) and the
/// serving collaborator (read side).
///
/// Listing order is newest `published_at` first, ties broken by fingerprint.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert if the item is unknown, else only refresh `last_seen_at`.
    /// Known means the same fingerprint, or the same `(source_id, guid)` when
    /// the item carries a guid. The item row and its asset rows are written
    /// atomically.
    async fn upsert_item(&self, item: &Item) -> Result<UpsertOutcome, StorageError>;

    async fn has_fingerprint(&self, fp: &Fingerprint) -> Result<bool, StorageError>;

    async fn get_item(&self, fp: &Fingerprint) -> Result<Option<StoredItem>, StorageError>;

    /// Record retrieval status (and local path) of one asset of a stored item.
    async fn update_asset(&self, asset: &AssetRef) -> Result<(), StorageError>;

    async fn list_items(&self, filter: &ItemFilter, page: Page)
        -> Result<Vec<StoredItem>, StorageError>;

    async fn count_items(&self, filter: &ItemFilter) -> Result<usize, StorageError>;
}
