// src/storage/sqlite.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{ItemFilter, ItemStore, Page, StoredItem, UpsertOutcome};
use crate::error::StorageError;
use crate::ingest::types::{AssetRef, AssetStatus, Fingerprint, Item};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONNECTIONS: u32 = 4;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        fingerprint TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        category TEXT NOT NULL,
        title TEXT NOT NULL,
        link TEXT,
        guid TEXT,
        published_at INTEGER NOT NULL,
        published_estimated INTEGER NOT NULL DEFAULT 0,
        summary TEXT NOT NULL,
        first_seen_at INTEGER NOT NULL,
        last_seen_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS assets (
        fingerprint TEXT NOT NULL REFERENCES items(fingerprint),
        idx INTEGER NOT NULL,
        url TEXT NOT NULL,
        local_path TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        PRIMARY KEY (fingerprint, url)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_published ON items (published_at DESC, fingerprint)",
    "CREATE INDEX IF NOT EXISTS idx_items_source ON items (source_id, published_at DESC)",
    // a guid identifies an entry within its source even when the link changes
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_source_guid ON items (source_id, guid) WHERE guid IS NOT NULL",
];

/// SQLite-backed [`ItemStore`] (WAL, busy timeout, small pool).
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn connect(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(BUSY_TIMEOUT)
            .connect_with(options)
            .await?;

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            sqlx::query(migration).execute(&pool).await.map_err(|e| {
                tracing::error!(target: "storage", migration = i, error = %e, "migration failed");
                StorageError::Database(e)
            })?;
        }
        tracing::info!(target: "storage", path = %path.display(), "sqlite store ready");

        Ok(Self {
            pool,
            db_path: path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn load_assets(&self, fp: &str) -> Result<Vec<AssetRef>, StorageError> {
        let rows = sqlx::query(
            "SELECT fingerprint, url, local_path, status FROM assets WHERE fingerprint = ? ORDER BY idx",
        )
        .bind(fp)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AssetRef, StorageError> {
                Ok(AssetRef {
                    fingerprint: Fingerprint::from_hex(row.try_get::<String, _>("fingerprint")?),
                    url: row.try_get("url")?,
                    local_path: row.try_get("local_path")?,
                    status: AssetStatus::parse(&row.try_get::<String, _>("status")?),
                })
            })
            .collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<StoredItem, StorageError> {
        let fp: String = row.try_get("fingerprint")?;
        let assets = self.load_assets(&fp).await?;
        Ok(StoredItem {
            item: Item {
                fingerprint: Fingerprint::from_hex(fp),
                source_id: row.try_get("source_id")?,
                category: row.try_get("category")?,
                title: row.try_get("title")?,
                link: row.try_get("link")?,
                guid: row.try_get("guid")?,
                published_at: from_unix(row.try_get("published_at")?),
                published_estimated: row.try_get("published_estimated")?,
                summary: row.try_get("summary")?,
                assets,
            },
            first_seen_at: from_unix(row.try_get("first_seen_at")?),
            last_seen_at: from_unix(row.try_get("last_seen_at")?),
        })
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ItemFilter) {
    if let Some(source_id) = &filter.source_id {
        qb.push(" AND source_id = ").push_bind(source_id.clone());
    }
    if let Some(category) = &filter.category {
        qb.push(" AND category = ").push_bind(category.clone());
    }
    if let Some(after) = filter.published_after {
        qb.push(" AND published_at >= ").push_bind(after.timestamp());
    }
    if let Some(before) = filter.published_before {
        qb.push(" AND published_at < ").push_bind(before.timestamp());
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn upsert_item(&self, item: &Item) -> Result<UpsertOutcome, StorageError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction takes the write lock up front.
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO items
            (fingerprint, source_id, category, title, link, guid,
             published_at, published_estimated, summary, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.fingerprint.as_str())
        .bind(&item.source_id)
        .bind(&item.category)
        .bind(&item.title)
        .bind(item.link.as_deref())
        .bind(item.guid.as_deref())
        .bind(item.published_at.timestamp())
        .bind(item.published_estimated)
        .bind(&item.summary)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let outcome = if inserted {
            for (idx, asset) in item.assets.iter().enumerate() {
                sqlx::query(
                    "INSERT OR IGNORE INTO assets (fingerprint, idx, url, local_path, status) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(item.fingerprint.as_str())
                .bind(idx as i64)
                .bind(&asset.url)
                .bind(&asset.local_path)
                .bind(asset.status.as_str())
                .execute(&mut *tx)
                .await?;
            }
            UpsertOutcome::Inserted
        } else {
            // ignored on the fingerprint key or the (source_id, guid) key
            sqlx::query(
                "UPDATE items SET last_seen_at = ? WHERE fingerprint = ? OR (source_id = ? AND guid = ?)",
            )
            .bind(now)
            .bind(item.fingerprint.as_str())
            .bind(&item.source_id)
            .bind(item.guid.as_deref())
            .execute(&mut *tx)
            .await?;
            UpsertOutcome::Refreshed
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn has_fingerprint(&self, fp: &Fingerprint) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM items WHERE fingerprint = ?")
            .bind(fp.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn get_item(&self, fp: &Fingerprint) -> Result<Option<StoredItem>, StorageError> {
        let row = sqlx::query("SELECT * FROM items WHERE fingerprint = ?")
            .bind(fp.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn update_asset(&self, asset: &AssetRef) -> Result<(), StorageError> {
        let res = sqlx::query(
            "UPDATE assets SET status = ?, local_path = ? WHERE fingerprint = ? AND url = ?",
        )
        .bind(asset.status.as_str())
        .bind(&asset.local_path)
        .bind(asset.fingerprint.as_str())
        .bind(&asset.url)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StorageError::Unavailable(format!(
                "no asset {} on item {}",
                asset.url, asset.fingerprint
            )));
        }
        Ok(())
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        page: Page,
    ) -> Result<Vec<StoredItem>, StorageError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM items WHERE 1 = 1");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY published_at DESC, fingerprint ASC LIMIT ")
            .push_bind(page.limit as i64)
            .push(" OFFSET ")
            .push_bind(page.offset as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.hydrate(row).await?);
        }
        Ok(out)
    }

    async fn count_items(&self, filter: &ItemFilter) -> Result<usize, StorageError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM items WHERE 1 = 1");
        push_filter(&mut qb, filter);
        let n: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(n.max(0) as usize)
    }
}
