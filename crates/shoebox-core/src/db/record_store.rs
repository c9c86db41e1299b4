//! Durable record store for gallery snapshots

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::error::{is_disk_full_message, Error, Result};
use crate::models::{GallerySnapshot, QueueKind};

use super::Database;

const RECORDS_KEY: &str = "records";

/// Whole-snapshot persistence for the sync engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read back the last saved snapshot, or an empty one on first run.
    async fn load(&self) -> Result<GallerySnapshot>;

    /// Overwrite the stored snapshot. Returns only once the write is durable.
    async fn save(&self, snapshot: &GallerySnapshot) -> Result<()>;
}

/// libSQL implementation of `RecordStore`
///
/// Each snapshot part lives in its own `gallery_state` row so the queues are
/// stored independently of the record list. A save rewrites every row in one
/// transaction.
#[derive(Clone)]
pub struct LibSqlRecordStore {
    db: Arc<Mutex<Database>>,
}

impl LibSqlRecordStore {
    /// Open the store backed by a database file.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path: PathBuf = db_path.into();
        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn encode(snapshot: &GallerySnapshot) -> Result<Vec<(&'static str, String)>> {
        let queues = &snapshot.queues;
        Ok(vec![
            (RECORDS_KEY, serde_json::to_string(&snapshot.records)?),
            (QueueKind::Save.as_str(), serde_json::to_string(&queues.save)?),
            (
                QueueKind::Upload.as_str(),
                serde_json::to_string(&queues.upload)?,
            ),
            (
                QueueKind::LocalDelete.as_str(),
                serde_json::to_string(&queues.local_delete)?,
            ),
            (
                QueueKind::RemoteDelete.as_str(),
                serde_json::to_string(&queues.remote_delete)?,
            ),
        ])
    }
}

#[async_trait]
impl RecordStore for LibSqlRecordStore {
    async fn load(&self) -> Result<GallerySnapshot> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT key, value FROM gallery_state", ())
            .await?;

        let mut snapshot = GallerySnapshot::default();
        while let Some(row) = rows.next().await? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            match key.as_str() {
                RECORDS_KEY => snapshot.records = decode(&key, &value)?,
                "save_queue" => snapshot.queues.save = decode(&key, &value)?,
                "upload_queue" => snapshot.queues.upload = decode(&key, &value)?,
                "local_delete_queue" => snapshot.queues.local_delete = decode(&key, &value)?,
                "remote_delete_queue" => snapshot.queues.remote_delete = decode(&key, &value)?,
                other => tracing::warn!("Ignoring unknown gallery_state row '{other}'"),
            }
        }

        tracing::debug!(
            "Loaded gallery snapshot with {} records",
            snapshot.records.len()
        );
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &GallerySnapshot) -> Result<()> {
        let rows = Self::encode(snapshot)?;
        let updated_at = chrono::Utc::now().timestamp_millis();

        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(write_error)?;

        for (key, value) in rows {
            if let Err(e) = conn
                .execute(
                    "INSERT OR REPLACE INTO gallery_state (key, value, updated_at) VALUES (?, ?, ?)",
                    libsql::params![key, value, updated_at],
                )
                .await
            {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(write_error(e));
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(write_error(e));
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    serde_json::from_str(value).map_err(|error| {
        Error::Database(format!("Corrupt gallery_state row '{key}': {error}"))
    })
}

fn write_error(error: libsql::Error) -> Error {
    let message = error.to_string();
    if is_disk_full_message(&message) {
        Error::StorageFull(message)
    } else {
        Error::LibSql(error)
    }
}
