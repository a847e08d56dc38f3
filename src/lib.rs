// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod error;
pub mod ingest;
pub mod metrics;
pub mod storage;

pub use crate::error::{ConfigError, FetchError, ParseError, StorageError};
pub use crate::ingest::types::{
    AssetRef, AssetStatus, FetchOutcome, Fingerprint, Item, RawDocument, Source,
};
pub use crate::ingest::{Coordinator, Pipeline, SourceRegistry};
pub use crate::storage::{ItemFilter, ItemStore, Page};
