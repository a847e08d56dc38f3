// src/ingest/scheduler.rs
//! Per-source cadence over a bounded worker pool.
//!
//! Each source has its own `next_due = cycle_start + interval`. A source is
//! never dispatched while its previous cycle is still in flight; a missed
//! slot is simply taken when the cycle finishes (no catch-up burst).

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use metrics::gauge;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ingest::outcome::OutcomeSink;
use crate::ingest::pipeline::Pipeline;
use crate::ingest::types::{FetchOutcome, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePhase {
    Idle,
    Fetching,
    Parsing,
    Deduplicating,
    Persisting,
    Errored,
}

impl SourcePhase {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SourcePhase::Fetching
                | SourcePhase::Parsing
                | SourcePhase::Deduplicating
                | SourcePhase::Persisting
        )
    }

    pub fn can_transition(self, to: SourcePhase) -> bool {
        use SourcePhase::*;
        match (self, to) {
            (Idle, Fetching)
            | (Fetching, Parsing)
            | (Parsing, Deduplicating)
            | (Deduplicating, Persisting)
            | (Persisting, Idle)
            | (Errored, Idle) => true,
            (from, Errored) => from.is_active(),
            _ => false,
        }
    }
}

/// Shared view of every source's current phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseBoard {
    inner: Arc<Mutex<HashMap<String, SourcePhase>>>,
}

impl PhaseBoard {
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let map = ids
            .into_iter()
            .map(|id| (id.to_string(), SourcePhase::Idle))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SourcePhase>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<SourcePhase> {
        self.lock().get(id).copied()
    }

    /// Apply a legal transition; illegal ones are logged and ignored.
    pub fn transition(&self, id: &str, to: SourcePhase) -> bool {
        let mut map = self.lock();
        let from = map.get(id).copied().unwrap_or(SourcePhase::Idle);
        if from == to {
            return true;
        }
        if !from.can_transition(to) {
            tracing::warn!(target: "ingest", source = id, ?from, ?to, "illegal phase transition");
            return false;
        }
        map.insert(id.to_string(), to);
        true
    }

    /// `Errored → Idle`, taken at the start of the next cycle.
    pub fn recover(&self, id: &str) {
        let mut map = self.lock();
        if let Some(phase) = map.get_mut(id) {
            if *phase == SourcePhase::Errored {
                *phase = SourcePhase::Idle;
            }
        }
    }

    fn force(&self, id: &str, phase: SourcePhase) {
        self.lock().insert(id.to_string(), phase);
    }

    pub fn snapshot(&self) -> HashMap<String, SourcePhase> {
        self.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub failed_cycles: usize,
}

struct Slot {
    next_due: Instant,
    in_flight: bool,
    last_started: Option<Instant>,
}

pub struct Coordinator {
    sources: Vec<Source>,
    pipeline: Arc<Pipeline>,
    sink: Arc<dyn OutcomeSink>,
    max_concurrency: usize,
    board: PhaseBoard,
}

impl Coordinator {
    pub fn new(
        sources: Vec<Source>,
        pipeline: Arc<Pipeline>,
        sink: Arc<dyn OutcomeSink>,
        max_concurrency: usize,
    ) -> Self {
        crate::ingest::ensure_metrics_described();
        let board = PhaseBoard::new(sources.iter().map(|s| s.id.as_str()));
        Self {
            sources,
            pipeline,
            sink,
            max_concurrency: max_concurrency.max(1),
            board,
        }
    }

    pub fn phases(&self) -> &PhaseBoard {
        &self.board
    }

    /// Poll every source at its own cadence until `shutdown` fires, then
    /// drain in-flight cycles.
    pub async fn run(&self, shutdown: CancellationToken) -> RunSummary {
        let start = Instant::now();
        let mut slots: HashMap<String, Slot> = self
            .sources
            .iter()
            .map(|s| {
                let slot = Slot {
                    next_due: start,
                    in_flight: false,
                    last_started: None,
                };
                (s.id.clone(), slot)
            })
            .collect();
        let mut tasks: JoinSet<(String, FetchOutcome)> = JoinSet::new();
        let mut summary = RunSummary::default();

        tracing::info!(
            target: "ingest",
            sources = self.sources.len(),
            max_concurrency = self.max_concurrency,
            "coordinator started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let now = Instant::now();
            // longest overdue first; a source that is always due cannot
            // keep a freed slot away from the others
            let mut due: Vec<(Instant, usize)> = self
                .sources
                .iter()
                .enumerate()
                .filter_map(|(idx, s)| {
                    let slot = slots.get(&s.id)?;
                    (!slot.in_flight && slot.next_due <= now).then_some((slot.next_due, idx))
                })
                .collect();
            due.sort();

            for (_, idx) in due {
                if tasks.len() >= self.max_concurrency {
                    break;
                }
                let source = &self.sources[idx];
                let Some(slot) = slots.get_mut(&source.id) else {
                    continue;
                };
                if let Some(prev) = slot.last_started {
                    let late = now.saturating_duration_since(prev + source.interval);
                    if !late.is_zero() {
                        tracing::debug!(
                            target: "ingest",
                            source = %source.id,
                            late_ms = late.as_millis() as u64,
                            "deferred tick"
                        );
                    }
                }
                slot.in_flight = true;
                slot.last_started = Some(now);
                slot.next_due = now + source.interval;

                let fut = guarded_cycle(
                    self.pipeline.clone(),
                    self.board.clone(),
                    source.clone(),
                    shutdown.clone(),
                );
                tasks.spawn(async move {
                    let outcome = fut.await;
                    (outcome.source_id.clone(), outcome)
                });
            }
            gauge!("ingest_in_flight").set(tasks.len() as f64);

            // With a full pool only a completion can make progress.
            let wake = if tasks.len() >= self.max_concurrency {
                None
            } else {
                slots
                    .values()
                    .filter(|s| !s.in_flight)
                    .map(|s| s.next_due)
                    .min()
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.finish(joined, &mut slots, &mut summary).await;
                }
                _ = sleep_until(wake) => {}
            }
        }

        tracing::info!(target: "ingest", in_flight = tasks.len(), "shutdown: draining");
        while let Some(joined) = tasks.join_next().await {
            self.finish(joined, &mut slots, &mut summary).await;
        }
        gauge!("ingest_in_flight").set(0.0);
        tracing::info!(
            target: "ingest",
            cycles = summary.cycles,
            failed = summary.failed_cycles,
            "coordinator stopped"
        );
        summary
    }

    /// Every source exactly once with bounded concurrency; outcomes come back
    /// in source order.
    pub async fn run_once(&self) -> Vec<FetchOutcome> {
        self.run_once_with(CancellationToken::new()).await
    }

    pub async fn run_once_with(&self, shutdown: CancellationToken) -> Vec<FetchOutcome> {
        let outcomes: Vec<FetchOutcome> = stream::iter(self.sources.iter().cloned())
            .map(|source| {
                guarded_cycle(
                    self.pipeline.clone(),
                    self.board.clone(),
                    source,
                    shutdown.clone(),
                )
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        for o in &outcomes {
            self.sink.record(o).await;
        }
        outcomes
    }

    async fn finish(
        &self,
        joined: Result<(String, FetchOutcome), tokio::task::JoinError>,
        slots: &mut HashMap<String, Slot>,
        summary: &mut RunSummary,
    ) {
        match joined {
            Ok((id, outcome)) => {
                if let Some(slot) = slots.get_mut(&id) {
                    slot.in_flight = false;
                }
                summary.cycles += 1;
                if !outcome.is_ok() {
                    summary.failed_cycles += 1;
                }
                self.sink.record(&outcome).await;
            }
            Err(e) => {
                // panics are caught inside the task; this is abort/runtime teardown
                tracing::error!(target: "ingest", error = %e, "cycle task lost");
            }
        }
    }
}

/// One cycle with panics turned into an errored outcome, so a bug in one
/// source never takes the coordinator down.
async fn guarded_cycle(
    pipeline: Arc<Pipeline>,
    board: PhaseBoard,
    source: Source,
    cancel: CancellationToken,
) -> FetchOutcome {
    let started = Utc::now();
    let res = AssertUnwindSafe(pipeline.run_cycle(&source, &board, &cancel))
        .catch_unwind()
        .await;
    match res {
        Ok(outcome) => outcome,
        Err(panic) => {
            board.force(&source.id, SourcePhase::Errored);
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(target: "ingest", source = %source.id, panic = %msg, "cycle panicked");
            let mut outcome = FetchOutcome::new(&source.id, started);
            outcome.error = Some(format!("cycle panicked: {msg}"));
            outcome.finished_at = Utc::now();
            outcome
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Cancel `token` once `signal` fires. A signal source that cannot be
/// installed is logged and never cancels: the daemon keeps running and must
/// be stopped some other way.
pub async fn cancel_on_signal<F>(signal: F, token: CancellationToken)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!(target: "ingest", "shutdown signal received");
            token.cancel();
        }
        Err(e) => {
            tracing::error!(
                target: "ingest",
                error = %e,
                "cannot listen for shutdown signal; running until killed"
            );
        }
    }
}
