// src/ingest/mod.rs
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod fingerprint;
pub mod outcome;
pub mod parse;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use dedup::{Classification, Deduplicator};
pub use fetch::{Fetcher, HttpTransport, RetryPolicy, Transport, TransportResponse};
pub use outcome::{LogSink, MemorySink, OutcomeSink};
pub use parse::{Dialect, Normalizer, ParsedFeed};
pub use pipeline::Pipeline;
pub use registry::SourceRegistry;
pub use scheduler::{Coordinator, PhaseBoard, RunSummary, SourcePhase};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_cycles_total", "Completed per-source cycles.");
        describe_counter!(
            "ingest_cycle_errors_total",
            "Cycles that ended early on a fetch or parse error."
        );
        describe_counter!("ingest_items_seen_total", "Entries parsed from feeds.");
        describe_counter!("ingest_items_new_total", "Items stored for the first time.");
        describe_counter!(
            "ingest_items_refreshed_total",
            "Already-stored items whose last-seen timestamp was refreshed."
        );
        describe_counter!(
            "ingest_item_failures_total",
            "Items that failed to persist."
        );
        describe_counter!("ingest_assets_failed_total", "Asset downloads that failed.");
        describe_counter!(
            "ingest_entries_skipped_total",
            "Ill-formed feed entries dropped by the parser."
        );
        describe_counter!(
            "ingest_fetch_retries_total",
            "Feed fetch attempts retried after a transient failure."
        );
        describe_counter!(
            "ingest_markdown_failures_total",
            "New items whose Markdown export failed."
        );
        describe_gauge!("ingest_in_flight", "Source cycles currently running.");
        describe_histogram!("ingest_fetch_ms", "Feed fetch time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "ingest_last_cycle_ts",
            "Unix ts when a source's last cycle finished."
        );
    });
}

/// Normalize markup-ish text: decode entities, strip tags, fold whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Drop script/style bodies, then strip remaining tags
    static RE_BLOCKS: OnceCell<regex::Regex> = OnceCell::new();
    let re_blocks = RE_BLOCKS.get_or_init(|| {
        regex::Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>")
            .expect("static regex")
    });
    out = re_blocks.replace_all(&out, " ").to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags =
        RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z!][^>]*>").expect("static regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. NBSP)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").expect("static regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Truncate to at most `max` chars (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Lower-case ASCII slug: runs of anything else become a single '-'.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}
