// src/ingest/parse/mod.rs
//! Raw feed document → ordered list of canonical [`Item`]s.
//!
//! The dialect is sniffed from the root element and the document is read
//! into a lenient element tree; each dialect maps its entries onto [`Entry`],
//! so the normalization rules live in one place.

mod atom;
mod rdf;
mod rss;
pub mod text;
mod tree;

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::histogram;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use tracing::warn;
use url::Url;

use crate::error::ParseError;
use crate::ingest::fingerprint::{self, canonical_link};
use crate::ingest::types::{AssetRef, AssetStatus, Item, RawDocument, Source};
use crate::ingest::{normalize_text, truncate_chars};
use crate::storage::assets::relative_path;

pub const UNTITLED: &str = "untitled";
pub const MAX_BODY_CHARS: usize = 20_000;

static RE_IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// RSS 0.9x / 2.0
    Rss,
    /// Atom 1.0
    Atom,
    /// RSS 1.0 (RDF)
    Rdf,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Rss => "rss",
            Dialect::Atom => "atom",
            Dialect::Rdf => "rdf",
        }
    }

    /// Look at the first element of the document.
    pub fn sniff(xml: &str) -> Result<Self, ParseError> {
        let mut reader = Reader::from_str(xml);
        let mut saw_text = false;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    return match e.local_name().as_ref() {
                        b"rss" => Ok(Dialect::Rss),
                        b"feed" => Ok(Dialect::Atom),
                        b"RDF" => Ok(Dialect::Rdf),
                        other => Err(ParseError::Unrecognized(
                            String::from_utf8_lossy(other).into_owned(),
                        )),
                    };
                }
                Ok(Event::Text(t)) => {
                    if !t.iter().all(|b| b.is_ascii_whitespace()) {
                        saw_text = true;
                    }
                }
                Ok(Event::Eof) if saw_text => {
                    return Err(ParseError::Unrecognized("#text".to_string()))
                }
                Ok(Event::Eof) => return Err(ParseError::Empty),
                Err(e) => {
                    return Err(ParseError::Malformed {
                        dialect: "xml",
                        message: e.to_string(),
                    })
                }
                Ok(_) => {}
            }
        }
    }
}

/// What every dialect's entry has to offer the normalizer. Raw markup; the
/// normalizer does the cleaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Entry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub timestamp: Option<String>,
    /// Preferred body markup (full content before summary).
    pub body: Option<String>,
    /// Enclosure/media URLs declared by the entry (inline images excluded).
    pub asset_urls: Vec<String>,
}

/// Channel-level view produced by a dialect reader.
#[derive(Debug, Default)]
pub(crate) struct Channel {
    pub title: Option<String>,
    pub entries: Vec<Entry>,
    /// Entries dropped because they were ill-formed or cut off.
    pub skipped: usize,
}

/// Result of parsing one document.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub dialect: Dialect,
    pub title: Option<String>,
    pub items: Vec<Item>,
    /// Ill-formed entries left out of `items`.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    max_assets_per_item: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Normalizer {
    pub fn new(max_assets_per_item: usize) -> Self {
        Self {
            max_assets_per_item,
        }
    }

    /// Parse a fetched document into items in document order.
    pub fn parse(&self, doc: &RawDocument, source: &Source) -> Result<ParsedFeed, ParseError> {
        let t0 = Instant::now();
        let xml = text::scrub_entities(&text::decode(&doc.body));
        let dialect = Dialect::sniff(&xml)?;
        let base = Url::parse(&source.url).ok();
        let ctx = Context {
            source,
            base: base.as_ref(),
            fetched_at: doc.fetched_at,
        };

        let dom = tree::build(&xml);
        let Some(root) = dom.root.as_ref() else {
            return Err(ParseError::Malformed {
                dialect: dialect.name(),
                message: dom.fatal.unwrap_or_else(|| "no root element".to_string()),
            });
        };
        let channel = match dialect {
            Dialect::Rss => rss::read(root),
            Dialect::Atom => atom::read(root),
            Dialect::Rdf => rdf::read(root),
        };
        if channel.entries.is_empty() {
            if let Some(message) = dom.fatal {
                return Err(ParseError::Malformed {
                    dialect: dialect.name(),
                    message,
                });
            }
        }
        if channel.skipped > 0 {
            warn!(
                source = %source.id,
                skipped = channel.skipped,
                "dropped ill-formed entries"
            );
        }

        let items = channel
            .entries
            .iter()
            .map(|e| self.build_item(e, &ctx))
            .collect();

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(ParsedFeed {
            dialect,
            title: channel
                .title
                .map(|t| normalize_text(&t))
                .filter(|t| !t.is_empty()),
            items,
            skipped: channel.skipped,
        })
    }

    fn build_item(&self, entry: &Entry, ctx: &Context<'_>) -> Item {
        let source_id = ctx.source.id.as_str();
        let title = entry
            .title
            .as_deref()
            .map(normalize_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        let link = entry
            .link
            .as_deref()
            .and_then(|l| canonical_link(ctx.base, l));
        let parsed_ts = entry.timestamp.as_deref().and_then(text::parse_timestamp);
        let fingerprint = fingerprint::derive(source_id, link.as_deref(), &title, parsed_ts);

        let (published_at, published_estimated) = match parsed_ts {
            Some(ts) => (ts, false),
            None => (whole_seconds(ctx.fetched_at), true),
        };

        let raw_body = entry.body.as_deref().unwrap_or_default();
        let summary = truncate_chars(&normalize_text(raw_body), MAX_BODY_CHARS);

        let assets = self
            .collect_asset_urls(entry, raw_body, ctx.base)
            .into_iter()
            .enumerate()
            .map(|(idx, url)| AssetRef {
                fingerprint: fingerprint.clone(),
                local_path: relative_path(source_id, &fingerprint, idx, &url),
                url,
                status: AssetStatus::Pending,
            })
            .collect();

        Item {
            fingerprint,
            source_id: source_id.to_string(),
            category: ctx.source.category.clone(),
            title,
            link,
            guid: entry
                .guid
                .as_deref()
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
            published_at,
            published_estimated,
            summary,
            assets,
        }
    }

    fn collect_asset_urls(
        &self,
        entry: &Entry,
        raw_body: &str,
        base: Option<&Url>,
    ) -> Vec<String> {
        let inline = RE_IMG_SRC
            .captures_iter(raw_body)
            .filter_map(|c| c.get(1))
            .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned());

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let declared = entry.asset_urls.iter().cloned();
        for raw in declared.chain(inline) {
            if out.len() >= self.max_assets_per_item {
                break;
            }
            if let Some(url) = canonical_link(base, &raw) {
                if seen.insert(url.clone()) {
                    out.push(url);
                }
            }
        }
        out
    }
}

struct Context<'a> {
    source: &'a Source,
    base: Option<&'a Url>,
    fetched_at: DateTime<Utc>,
}

fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}
