// src/storage/markdown.rs
//! Optional Markdown export of newly stored items: one file per item with a
//! YAML front-matter block, for static-site consumers.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StorageError;
use crate::ingest::slugify;
use crate::ingest::types::{AssetStatus, Item};
use crate::storage::assets::write_atomic;

const MAX_SLUG: usize = 200;

#[derive(Debug, Clone)]
pub struct MarkdownExporter {
    dir: PathBuf,
    assets_root: PathBuf,
}

impl MarkdownExporter {
    /// `assets_root` is the asset area root; links are written relative to `dir`.
    pub fn new(dir: impl Into<PathBuf>, assets_root: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            assets_root: assets_root.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `<dir>/<YYYY-MM-DD>-<slug>.md`. A different item already owning
    /// that name gets the fingerprint prefix appended instead.
    pub async fn export(
        &self,
        item: &Item,
        feed_title: Option<&str>,
        fetched_at: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        let content = render(item, feed_title, fetched_at, &self.asset_prefix()?)?;
        let path = self.target_path(item).await?;
        write_atomic(&path, content.as_bytes()).await?;
        Ok(path)
    }

    async fn target_path(&self, item: &Item) -> Result<PathBuf, StorageError> {
        let mut slug = slugify(&item.title);
        slug.truncate(MAX_SLUG);
        if slug.is_empty() {
            slug.push_str("post");
        }
        let date = item.published_at.format("%Y-%m-%d");

        tokio::fs::create_dir_all(&self.dir).await?;
        let plain = self.dir.join(format!("{date}-{slug}.md"));
        if claim(&plain, item).await? {
            Ok(plain)
        } else {
            Ok(self
                .dir
                .join(format!("{date}-{slug}-{}.md", item.fingerprint.short())))
        }
    }

    fn asset_prefix(&self) -> Result<String, StorageError> {
        let from = absolute(&self.dir)?;
        let to = absolute(&self.assets_root)?;
        let rel = relative_to(&to, &from);
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"))
    }
}

/// Take `path` for `item`: either create it (as an empty placeholder the
/// caller then replaces) or find it already carrying the item's fingerprint.
/// Creation is exclusive, so concurrent exporters never both get the name.
async fn claim(path: &Path, item: &Item) -> Result<bool, StorageError> {
    let created = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;
    match created {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let existing = tokio::fs::read(path).await?;
            Ok(String::from_utf8_lossy(&existing).contains(&fingerprint_line(item)))
        }
        Err(e) => Err(StorageError::Io(e)),
    }
}

fn fingerprint_line(item: &Item) -> String {
    format!("fingerprint: \"{}\"", item.fingerprint)
}

// JSON strings are valid YAML double-quoted scalars.
fn quoted(s: &str) -> Result<String, StorageError> {
    Ok(serde_json::to_string(s)?)
}

fn render(
    item: &Item,
    feed_title: Option<&str>,
    fetched_at: DateTime<Utc>,
    asset_prefix: &str,
) -> Result<String, StorageError> {
    let mut out = String::with_capacity(item.summary.len() + 512);
    out.push_str("---\n");
    out.push_str(&format!("title: {}\n", quoted(&item.title)?));
    out.push_str(&format!(
        "date: {}\n",
        quoted(&item.published_at.to_rfc3339_opts(SecondsFormat::Secs, true))?
    ));
    out.push_str(&format!(
        "source_url: {}\n",
        quoted(item.link.as_deref().unwrap_or_default())?
    ));
    out.push_str(&format!(
        "guid: {}\n",
        quoted(item.guid.as_deref().unwrap_or_default())?
    ));
    out.push_str(&fingerprint_line(item));
    out.push('\n');
    out.push_str(&format!(
        "original_feed: {}\n",
        quoted(feed_title.unwrap_or(&item.source_id))?
    ));
    out.push_str(&format!("category: {}\n", quoted(&item.category)?));
    out.push_str(&format!(
        "fetched_at: {}\n",
        quoted(&fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true))?
    ));
    out.push_str("---\n\n");

    let mut blocks: Vec<String> = Vec::new();
    if !item.summary.is_empty() {
        blocks.push(item.summary.clone());
    }
    for asset in item
        .assets
        .iter()
        .filter(|a| a.status == AssetStatus::Retrieved)
    {
        let link = if asset_prefix.is_empty() {
            asset.local_path.clone()
        } else {
            format!("{asset_prefix}/{}", asset.local_path)
        };
        blocks.push(format!("![{}]({link})", item.title.replace(['[', ']'], "")));
    }
    out.push_str(&blocks.join("\n\n"));
    out.push('\n');
    Ok(out)
}

fn absolute(p: &Path) -> Result<PathBuf, StorageError> {
    if p.is_absolute() {
        Ok(p.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(p))
    }
}

/// Lexical relative path from directory `base` to `target`.
fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target = lexical(target);
    let base = lexical(base);
    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for c in &target[common..] {
        rel.push(c);
    }
    rel
}

fn lexical(p: &Path) -> Vec<std::ffi::OsString> {
    let mut out: Vec<std::ffi::OsString> = Vec::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str().to_owned()),
        }
    }
    out
}
