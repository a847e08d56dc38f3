// tests/common/mod.rs
// Shared doubles for the integration tests: a scripted transport and a store
// that can be told to fail.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cybersec_feeds::error::{FetchError, StorageError};
use cybersec_feeds::ingest::{
    Fetcher, Normalizer, Pipeline, RetryPolicy, Transport, TransportResponse,
};
use cybersec_feeds::storage::{
    ItemFilter, ItemStore, MemoryStore, Page, StoredItem, UpsertOutcome,
};
use cybersec_feeds::{AssetRef, Fingerprint, Item, Source};

pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(format!("tests/fixtures/{name}")).expect("fixture")
}

pub fn source(id: &str, url: &str, interval_secs: u64) -> Source {
    Source {
        id: id.to_string(),
        name: id.to_uppercase(),
        category: "news".to_string(),
        url: url.to_string(),
        interval: Duration::from_secs(interval_secs),
        enabled: true,
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        request_timeout: Duration::from_secs(60),
        asset_timeout: Duration::from_secs(5),
        max_retries: 0,
        backoff_base: Duration::from_millis(10),
    }
}

pub fn pipeline(transport: Arc<FixtureTransport>, store: Arc<dyn ItemStore>) -> Pipeline {
    Pipeline::new(
        Fetcher::new(transport, fast_policy()),
        Normalizer::new(4),
        store,
    )
}

/// Minimal RSS 2.0 document with one item per (title, link).
pub fn rss(items: &[(&str, &str)]) -> Vec<u8> {
    let mut xml = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>"#);
    for (title, link) in items {
        xml.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link>\
             <pubDate>Mon, 01 Jul 2024 10:00:00 +0000</pubDate></item>"
        ));
    }
    xml.push_str("</channel></rss>");
    xml.into_bytes()
}

#[derive(Clone)]
pub enum Reply {
    Body(u16, Vec<u8>),
    Fail(FetchError),
    /// Answer after a (virtual) delay.
    Slow(Duration, Vec<u8>),
    Panic,
}

/// Serves scripted replies per URL; the last reply of a script repeats.
/// Unknown URLs answer 404.
#[derive(Default)]
pub struct FixtureTransport {
    routes: Mutex<HashMap<String, Vec<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FixtureTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: &str, reply: Reply) {
        self.script(url, vec![reply]);
    }

    pub fn ok(&self, url: &str, body: Vec<u8>) {
        self.route(url, Reply::Body(200, body));
    }

    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        self.routes.lock().unwrap().insert(url.to_string(), replies);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<TransportResponse, FetchError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let c = calls.entry(url.to_string()).or_insert(0);
            *c += 1;
            *c
        };
        let reply = {
            let routes = self.routes.lock().unwrap();
            routes
                .get(url)
                .and_then(|script| script.get(n - 1).or_else(|| script.last()))
                .cloned()
                .unwrap_or(Reply::Body(404, Vec::new()))
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let res = match reply {
            Reply::Body(status, body) => Ok(TransportResponse {
                status,
                content_type: Some("application/xml".into()),
                body,
            }),
            Reply::Fail(e) => Err(e),
            Reply::Slow(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(TransportResponse {
                    status: 200,
                    content_type: None,
                    body,
                })
            }
            Reply::Panic => panic!("transport exploded for {url}"),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }
}

/// MemoryStore whose n-th `upsert_item` call (1-based) fails.
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_on: usize,
    upserts: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_on(n: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_on: n,
            upserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ItemStore for FlakyStore {
    async fn upsert_item(&self, item: &Item) -> Result<UpsertOutcome, StorageError> {
        let n = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(StorageError::Unavailable("disk on fire".into()));
        }
        self.inner.upsert_item(item).await
    }

    async fn has_fingerprint(&self, fp: &Fingerprint) -> Result<bool, StorageError> {
        self.inner.has_fingerprint(fp).await
    }

    async fn get_item(&self, fp: &Fingerprint) -> Result<Option<StoredItem>, StorageError> {
        self.inner.get_item(fp).await
    }

    async fn update_asset(&self, asset: &AssetRef) -> Result<(), StorageError> {
        self.inner.update_asset(asset).await
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        page: Page,
    ) -> Result<Vec<StoredItem>, StorageError> {
        self.inner.list_items(filter, page).await
    }

    async fn count_items(&self, filter: &ItemFilter) -> Result<usize, StorageError> {
        self.inner.count_items(filter).await
    }
}

/// MemoryStore that fires `cancel` once its first `upsert_item` has landed,
/// standing in for a shutdown that arrives mid-batch.
pub struct CancellingStore {
    pub inner: MemoryStore,
    cancel: tokio_util::sync::CancellationToken,
}

impl CancellingStore {
    pub fn new(cancel: tokio_util::sync::CancellationToken) -> Self {
        Self {
            inner: MemoryStore::new(),
            cancel,
        }
    }
}

#[async_trait]
impl ItemStore for CancellingStore {
    async fn upsert_item(&self, item: &Item) -> Result<UpsertOutcome, StorageError> {
        let out = self.inner.upsert_item(item).await;
        self.cancel.cancel();
        out
    }

    async fn has_fingerprint(&self, fp: &Fingerprint) -> Result<bool, StorageError> {
        self.inner.has_fingerprint(fp).await
    }

    async fn get_item(&self, fp: &Fingerprint) -> Result<Option<StoredItem>, StorageError> {
        self.inner.get_item(fp).await
    }

    async fn update_asset(&self, asset: &AssetRef) -> Result<(), StorageError> {
        self.inner.update_asset(asset).await
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        page: Page,
    ) -> Result<Vec<StoredItem>, StorageError> {
        self.inner.list_items(filter, page).await
    }

    async fn count_items(&self, filter: &ItemFilter) -> Result<usize, StorageError> {
        self.inner.count_items(filter).await
    }
}
