// src/ingest/outcome.rs
use std::sync::Mutex;

use metrics::{counter, gauge};

use crate::ingest::types::FetchOutcome;

/// Receives one [`FetchOutcome`] per finished cycle.
#[async_trait::async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn record(&self, outcome: &FetchOutcome);
}

/// Structured log line plus per-source counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait::async_trait]
impl OutcomeSink for LogSink {
    async fn record(&self, o: &FetchOutcome) {
        let source = o.source_id.clone();
        counter!("ingest_cycles_total", "source" => source.clone()).increment(1);
        counter!("ingest_items_seen_total", "source" => source.clone()).increment(o.items_seen as u64);
        counter!("ingest_items_new_total", "source" => source.clone()).increment(o.items_new as u64);
        counter!("ingest_items_refreshed_total", "source" => source.clone())
            .increment(o.items_refreshed as u64);
        counter!("ingest_item_failures_total", "source" => source.clone())
            .increment(o.item_failures as u64);
        counter!("ingest_assets_failed_total", "source" => source.clone())
            .increment(o.assets_failed as u64);
        counter!("ingest_entries_skipped_total", "source" => source.clone())
            .increment(o.entries_skipped as u64);
        gauge!("ingest_last_cycle_ts", "source" => source.clone())
            .set(o.finished_at.timestamp() as f64);

        let took_ms = (o.finished_at - o.started_at).num_milliseconds();
        match &o.error {
            None => tracing::info!(
                target: "ingest",
                source = %o.source_id,
                seen = o.items_seen,
                new = o.items_new,
                refreshed = o.items_refreshed,
                failures = o.item_failures,
                assets_failed = o.assets_failed,
                skipped = o.entries_skipped,
                took_ms,
                "cycle done"
            ),
            Some(err) => {
                counter!("ingest_cycle_errors_total", "source" => source).increment(1);
                tracing::warn!(
                    target: "ingest",
                    source = %o.source_id,
                    error = %err,
                    interrupted = o.interrupted,
                    seen = o.items_seen,
                    new = o.items_new,
                    took_ms,
                    "cycle failed"
                );
            }
        }
    }
}

/// Keeps every outcome in memory (tests, embedding).
#[derive(Debug, Default)]
pub struct MemorySink {
    outcomes: Mutex<Vec<FetchOutcome>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<FetchOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn for_source(&self, source_id: &str) -> Vec<FetchOutcome> {
        self.snapshot()
            .into_iter()
            .filter(|o| o.source_id == source_id)
            .collect()
    }
}

#[async_trait::async_trait]
impl OutcomeSink for MemorySink {
    async fn record(&self, outcome: &FetchOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(outcome.clone());
    }
}

/// Fan out to several sinks in order.
#[async_trait::async_trait]
impl<A: OutcomeSink, B: OutcomeSink> OutcomeSink for (A, B) {
    async fn record(&self, outcome: &FetchOutcome) {
        self.0.record(outcome).await;
        self.1.record(outcome).await;
    }
}
