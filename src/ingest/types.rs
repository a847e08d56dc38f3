// src/ingest/types.rs
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured feed endpoint. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub id: String,       // slug, e.g. "bleepingcomputer"
    pub name: String,     // display name
    pub category: String, // display grouping, e.g. "news", "cve"
    pub url: String,
    pub interval: Duration,
    pub enabled: bool,
}

/// One fetched feed document. Lives for a single cycle only.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_id: String,
    pub fetched_at: DateTime<Utc>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub status: u16,
}

/// Stable deduplication key of an [`Item`]: 64 lower-case hex chars of a SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex chars; enough to keep asset directories distinct.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(16);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical normalized representation of one feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub fingerprint: Fingerprint,
    pub source_id: String,
    pub category: String,
    pub title: String,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub published_at: DateTime<Utc>,
    /// True when the feed carried no usable timestamp and fetch time was used.
    pub published_estimated: bool,
    pub summary: String,
    pub assets: Vec<AssetRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Retrieved,
    Failed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Retrieved => "retrieved",
            AssetStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "retrieved" => AssetStatus::Retrieved,
            "failed" => AssetStatus::Failed,
            _ => AssetStatus::Pending,
        }
    }
}

/// Media referenced by an item, downloaded separately and best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub fingerprint: Fingerprint, // owning item
    pub url: String,
    pub local_path: String, // relative to the asset area root
    pub status: AssetStatus,
}

/// Per-source, per-cycle report for operational monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchOutcome {
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items_seen: usize,
    pub items_new: usize,
    pub items_refreshed: usize,
    pub item_failures: usize,
    pub assets_failed: usize,
    /// Ill-formed entries the parser dropped.
    pub entries_skipped: usize,
    /// Shutdown stopped the cycle before every seen item was handled.
    pub interrupted: bool,
    pub error: Option<String>,
}

impl FetchOutcome {
    pub fn new(source_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            started_at,
            finished_at: started_at,
            items_seen: 0,
            items_new: 0,
            items_refreshed: 0,
            item_failures: 0,
            assets_failed: 0,
            entries_skipped: 0,
            interrupted: false,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
