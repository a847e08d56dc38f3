// src/ingest/pipeline.rs
//! One source cycle: fetch → parse → classify → persist (+ assets, export).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::error::{AssetError, CycleError, FetchError};
use crate::ingest::dedup::{Classification, Deduplicator};
use crate::ingest::fetch::Fetcher;
use crate::ingest::parse::Normalizer;
use crate::ingest::scheduler::{PhaseBoard, SourcePhase};
use crate::ingest::types::{AssetRef, AssetStatus, FetchOutcome, Item, Source};
use crate::storage::{AssetArea, ItemStore, MarkdownExporter};

pub struct Pipeline {
    fetcher: Fetcher,
    normalizer: Normalizer,
    dedup: Deduplicator,
    store: Arc<dyn ItemStore>,
    assets: Option<AssetArea>,
    markdown: Option<MarkdownExporter>,
}

impl Pipeline {
    pub fn new(fetcher: Fetcher, normalizer: Normalizer, store: Arc<dyn ItemStore>) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            fetcher,
            normalizer,
            dedup: Deduplicator::new(store.clone()),
            store,
            assets: None,
            markdown: None,
        }
    }

    /// Download assets of new items into `area`. Without one, assets stay `Pending`.
    pub fn with_assets(mut self, area: AssetArea) -> Self {
        self.assets = Some(area);
        self
    }

    pub fn with_markdown(mut self, exporter: MarkdownExporter) -> Self {
        self.markdown = Some(exporter);
        self
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    /// Run one cycle for `source`. Never fails: problems end up in the outcome.
    pub async fn run_cycle(
        &self,
        source: &Source,
        board: &PhaseBoard,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let mut outcome = FetchOutcome::new(&source.id, Utc::now());
        board.recover(&source.id);

        match self.cycle(source, board, cancel, &mut outcome).await {
            Ok(()) => {
                board.transition(&source.id, SourcePhase::Idle);
            }
            Err(e) => {
                board.transition(&source.id, SourcePhase::Errored);
                outcome.error = Some(e.to_string());
            }
        }
        outcome.finished_at = Utc::now();
        outcome
    }

    async fn cycle(
        &self,
        source: &Source,
        board: &PhaseBoard,
        cancel: &CancellationToken,
        outcome: &mut FetchOutcome,
    ) -> Result<(), CycleError> {
        board.transition(&source.id, SourcePhase::Fetching);
        let doc = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(FetchError::Cancelled { url: source.url.clone() }.into());
            }
            res = self.fetcher.fetch(source) => res?,
        };

        board.transition(&source.id, SourcePhase::Parsing);
        let feed = self.normalizer.parse(&doc, source)?;
        outcome.items_seen = feed.items.len();
        outcome.entries_skipped = feed.skipped;

        // classification happens inside `admit`, under the fingerprint lock
        board.transition(&source.id, SourcePhase::Deduplicating);
        board.transition(&source.id, SourcePhase::Persisting);
        let feed_title = feed.title.as_deref();
        for (handled, item) in feed.items.iter().enumerate() {
            // an in-flight write always completes; stop only between items
            if cancel.is_cancelled() {
                outcome.interrupted = true;
                return Err(CycleError::Interrupted {
                    handled,
                    seen: feed.items.len(),
                });
            }
            match self.dedup.admit(item).await {
                Ok(Classification::New) => {
                    outcome.items_new += 1;
                    outcome.assets_failed += self
                        .finish_new_item(item, feed_title, doc.fetched_at, cancel)
                        .await;
                }
                Ok(Classification::AlreadySeen) => outcome.items_refreshed += 1,
                Err(e) => {
                    outcome.item_failures += 1;
                    tracing::warn!(
                        target: "ingest",
                        source = %source.id,
                        fingerprint = %item.fingerprint.short(),
                        error = %e,
                        "item not persisted"
                    );
                }
            }
        }

        tracing::debug!(
            target: "ingest",
            source = %source.id,
            dialect = feed.dialect.name(),
            seen = feed.items.len(),
            skipped = feed.skipped,
            new = outcome.items_new,
            "persisted"
        );
        Ok(())
    }

    /// Assets and Markdown export for a freshly inserted item. Returns the
    /// number of assets that failed.
    async fn finish_new_item(
        &self,
        item: &Item,
        feed_title: Option<&str>,
        fetched_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> usize {
        let mut item = item.clone();
        let mut failed = 0;

        if let Some(area) = &self.assets {
            for asset in item.assets.iter_mut() {
                let res = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    res = self.retrieve_asset(area, asset) => Some(res),
                };
                match res {
                    // left Pending for a later backfill
                    None => break,
                    Some(Ok(())) => asset.status = AssetStatus::Retrieved,
                    Some(Err(e)) => {
                        failed += 1;
                        asset.status = AssetStatus::Failed;
                        tracing::debug!(
                            target: "ingest",
                            source = %item.source_id,
                            url = %asset.url,
                            error = %e,
                            "asset not retrieved"
                        );
                    }
                }
                if let Err(e) = self.store.update_asset(asset).await {
                    tracing::warn!(
                        target: "ingest",
                        source = %item.source_id,
                        url = %asset.url,
                        error = %e,
                        "asset status not recorded"
                    );
                }
            }
        }

        if let Some(md) = &self.markdown {
            if let Err(e) = md.export(&item, feed_title, fetched_at).await {
                counter!("ingest_markdown_failures_total").increment(1);
                tracing::warn!(
                    target: "ingest",
                    source = %item.source_id,
                    fingerprint = %item.fingerprint.short(),
                    error = %e,
                    "markdown export failed"
                );
            }
        }
        failed
    }

    async fn retrieve_asset(&self, area: &AssetArea, asset: &AssetRef) -> Result<(), AssetError> {
        let bytes = self.fetcher.fetch_asset(&asset.url).await?;
        area.store_asset(asset, &bytes).await?;
        Ok(())
    }
}
