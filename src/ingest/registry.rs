// src/ingest/registry.rs
//! Source registry: validated, ordered list of feed endpoints built once at startup.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::ingest::config::{FeedsConfig, IngestSettings, SourceEntry};
use crate::ingest::slugify;
use crate::ingest::types::Source;

const DEFAULT_CATEGORY: &str = "news";

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    /// Validate every entry; any problem is a [`ConfigError`].
    pub fn from_config(cfg: &FeedsConfig) -> Result<Self, ConfigError> {
        cfg.ingest.validate()?;
        if cfg.sources.is_empty() {
            return Err(ConfigError::invalid_setting(
                "sources",
                "at least one source is required",
            ));
        }

        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(cfg.sources.len());
        for entry in &cfg.sources {
            let source = build_source(entry, &cfg.ingest)?;
            if !seen.insert(source.id.clone()) {
                return Err(ConfigError::invalid_source(&source.id, "duplicate id"));
            }
            sources.push(source);
        }
        Ok(Self { sources })
    }

    /// Registry over already-built sources (tests, embedding).
    pub fn from_sources(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    /// Enabled sources in configuration order.
    pub fn list_enabled_sources(&self) -> Vec<Source> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn build_source(entry: &SourceEntry, settings: &IngestSettings) -> Result<Source, ConfigError> {
    let name = entry.name.trim();
    let id = match entry.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => slugify(name),
    };
    if id.is_empty() || !id.chars().all(is_id_char) {
        return Err(ConfigError::invalid_source(
            &id,
            "id must match [a-z0-9_-]+",
        ));
    }
    if name.is_empty() {
        return Err(ConfigError::invalid_source(&id, "name is empty"));
    }

    let url = entry.url.trim();
    match url::Url::parse(url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {}
        Ok(u) => {
            return Err(ConfigError::invalid_source(
                &id,
                format!("unsupported URL scheme {:?}", u.scheme()),
            ))
        }
        Err(e) => {
            return Err(ConfigError::invalid_source(
                &id,
                format!("invalid URL {url:?}: {e}"),
            ))
        }
    }

    let interval = entry
        .interval
        .as_ref()
        .unwrap_or(&settings.default_interval)
        .to_duration()
        .map_err(|m| ConfigError::invalid_source(&id, m))?;

    let category = entry
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string();

    Ok(Source {
        id,
        name: name.to_string(),
        category,
        url: url.to_string(),
        interval,
        enabled: entry.enabled,
    })
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}
