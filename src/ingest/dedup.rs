// src/ingest/dedup.rs
//! New-vs-seen classification with a per-fingerprint critical section, so two
//! concurrent writers never both treat the same item as new.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::ingest::types::{Fingerprint, Item};
use crate::storage::{ItemStore, UpsertOutcome};

const LOCK_STRIPES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    AlreadySeen,
}

#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn ItemStore>,
    locks: Arc<Vec<Mutex<()>>>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        let locks = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Self {
            store,
            locks: Arc::new(locks),
        }
    }

    /// Read-only look-up; the answer may be stale by the time it is acted on.
    pub async fn classify(&self, item: &Item) -> Result<Classification, StorageError> {
        if self.store.has_fingerprint(&item.fingerprint).await? {
            Ok(Classification::AlreadySeen)
        } else {
            Ok(Classification::New)
        }
    }

    /// Check-then-write under the fingerprint's lock. New items are inserted,
    /// seen ones only get their last-seen timestamp refreshed.
    pub async fn admit(&self, item: &Item) -> Result<Classification, StorageError> {
        let _guard = self.lock_for(&item.fingerprint).lock().await;
        match self.store.upsert_item(item).await? {
            UpsertOutcome::Inserted => Ok(Classification::New),
            UpsertOutcome::Refreshed => Ok(Classification::AlreadySeen),
        }
    }

    fn lock_for(&self, fp: &Fingerprint) -> &Mutex<()> {
        let mut h = DefaultHasher::new();
        fp.hash(&mut h);
        &self.locks[(h.finish() as usize) % self.locks.len()]
    }
}
