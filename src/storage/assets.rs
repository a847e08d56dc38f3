// src/storage/assets.rs
//! Path-addressed blob area for downloaded assets.
//!
//! ```text
//! {root}/
//! └── {source_id}/
//!     └── {fingerprint[..16]}/
//!         ├── 00-header.jpg
//!         └── 01-diagram.png
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;

use crate::error::StorageError;
use crate::ingest::types::{AssetRef, Fingerprint};

const MAX_FILE_NAME: usize = 80;

#[derive(Debug, Clone)]
pub struct AssetArea {
    root: PathBuf,
}

impl AssetArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative asset path into the area. Anything that could escape
    /// the root is rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(relative);
        if relative.is_empty()
            || !rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(rel))
    }

    /// Write the asset's bytes at its local path. Returns the absolute path.
    pub async fn store_asset(&self, asset: &AssetRef, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.resolve(&asset.local_path)?;
        write_atomic(&path, bytes).await?;
        Ok(path)
    }

    /// Read a stored asset, `None` if it was never written.
    pub async fn read_asset(&self, relative: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.resolve(relative)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write to a sibling temp file, then rename over the target. The temp file
/// is removed on any failure.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_sibling(path);

    let written: std::io::Result<()> = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::Io(e));
    }
    Ok(())
}

/// `<path>.<pid>-<seq>.part`; concurrent writers of one target never share it.
fn temp_sibling(path: &Path) -> PathBuf {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}-{seq}.part", std::process::id()));
    PathBuf::from(name)
}

/// Relative location of the `index`-th asset of an item.
pub fn relative_path(source_id: &str, fp: &Fingerprint, index: usize, url: &str) -> String {
    format!(
        "{}/{}/{:02}-{}",
        source_id,
        fp.short(),
        index,
        file_name_from_url(url)
    )
}

fn file_name_from_url(url: &str) -> String {
    let last = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "asset".to_string()
    } else {
        cleaned.to_string()
    }
}
