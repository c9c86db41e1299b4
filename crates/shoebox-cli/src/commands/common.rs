use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use shoebox_core::assets::FsAssetStore;
use shoebox_core::config::GalleryConfig;
use shoebox_core::connectivity::{ReachabilityProbe, TcpProbe};
use shoebox_core::db::LibSqlRecordStore;
use shoebox_core::storage::{MemoryObjectStore, ObjectStore, R2ObjectStore};
use shoebox_core::{
    EngineDeps, GalleryView, ImageId, ImageRecord, ImageStatus, SyncEngine, SyncEvent,
    SyncState,
};
use tokio::sync::broadcast;

use crate::error::CliError;

/// An opened gallery plus what the commands need around it.
pub struct Session {
    pub engine: SyncEngine,
    pub config: GalleryConfig,
    /// False under `--offline` or without remote configuration
    pub remote_enabled: bool,
    pub offline: bool,
}

impl Session {
    /// Probe the network and, when it is usable, bring the engine online.
    pub async fn connect_if_reachable(&self) -> bool {
        if !self.remote_enabled {
            return false;
        }
        let probe = TcpProbe::new(self.config.probe_addr.clone(), self.config.probe_timeout);
        let connected = probe.probe().await.is_usable();
        self.engine.on_connectivity_changed(connected).await;
        connected
    }

    /// Fail early for commands that cannot work without the bucket.
    pub fn require_remote(&self, command: &'static str) -> Result<(), CliError> {
        if self.offline {
            return Err(CliError::OfflineMode(command));
        }
        if self.config.remote.is_none() {
            return Err(CliError::RemoteNotConfigured);
        }
        Ok(())
    }
}

pub fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("SHOEBOX_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shoebox")
}

/// Open the gallery at `data_dir` and run any work left from a previous run.
///
/// The engine starts offline; commands that want the network call
/// [`Session::connect_if_reachable`].
pub async fn open_session(data_dir: &Path, offline: bool) -> Result<Session, CliError> {
    let config = GalleryConfig::from_env(data_dir)?;
    let record_store = LibSqlRecordStore::open(config.db_path()).await?;

    let object_store: Arc<dyn ObjectStore> = match (&config.remote, offline) {
        (Some(remote), false) => Arc::new(R2ObjectStore::new(remote.clone())),
        // Never reached while the engine stays offline.
        _ => Arc::new(MemoryObjectStore::new()),
    };
    let remote_enabled = config.remote.is_some() && !offline;

    let deps = EngineDeps {
        record_store: Arc::new(record_store),
        asset_store: Arc::new(FsAssetStore::new(config.assets_dir())),
        object_store,
    };
    let engine = SyncEngine::open(deps, false).await?;
    engine.resume().await;

    Ok(Session {
        engine,
        config,
        remote_enabled,
        offline,
    })
}

pub fn parse_image_id(raw: &str) -> Result<ImageId, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyImageId);
    }
    trimmed
        .parse::<ImageId>()
        .map_err(|_| CliError::ImageNotFound(trimmed.to_string()))
}

#[derive(Debug, Serialize)]
pub struct ImageListItem {
    pub id: String,
    pub status: String,
    pub local_path: Option<String>,
    pub remote_key: Option<String>,
    pub last_error: Option<String>,
    pub uploaded_at: Option<String>,
    pub added_relative: String,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: String,
    pub connected: bool,
    pub remote_configured: bool,
    pub images: usize,
    pub pending_uploads: usize,
    pub failed_uploads: usize,
    pub pending_remote_deletes: usize,
}

pub fn record_to_list_item(record: &ImageRecord, now_ms: i64) -> ImageListItem {
    ImageListItem {
        id: record.id.to_string(),
        status: record.status.to_string(),
        local_path: record
            .local_path
            .as_ref()
            .map(|path| path.display().to_string()),
        remote_key: record.remote_key.clone(),
        last_error: record.last_error.clone(),
        uploaded_at: record.uploaded_at.map(|at| at.to_rfc3339()),
        added_relative: added_relative(record, now_ms),
    }
}

pub fn format_record_lines(records: &[ImageRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let id = record.id.to_string();
            let status = record.status.as_str();
            let relative_time = added_relative(record, now_ms);
            match &record.last_error {
                Some(error) => format!("{id:<17}  {status:<14}  {relative_time:<10}  {error}"),
                None => format!("{id:<17}  {status:<14}  {relative_time}"),
            }
        })
        .collect()
}

pub fn status_report(view: &GalleryView, remote_configured: bool) -> StatusReport {
    StatusReport {
        state: SyncState::from_view(view).to_string(),
        connected: view.connected,
        remote_configured,
        images: view.records.len(),
        pending_uploads: view.pending_uploads,
        failed_uploads: view
            .records
            .iter()
            .filter(|record| record.status == ImageStatus::UploadFailed)
            .count(),
        pending_remote_deletes: view.pending_remote_deletes,
    }
}

pub fn describe_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::LocalPersistFailed { id, error } => format!("Could not add {id}: {error}"),
        SyncEvent::Uploaded { id, remote_key } => format!("Uploaded {id} as {remote_key}"),
        SyncEvent::UploadFailed { id, error } => format!("Upload of {id} failed: {error}"),
        SyncEvent::RemoteDeleted { id, remote_key } => {
            format!("Deleted {remote_key} (image {id}) from the bucket")
        }
        SyncEvent::RemoteDeleteFailed { id, error } => {
            format!("Remote delete of {id} failed: {error}")
        }
        SyncEvent::PersistFailed {
            storage_full: true, ..
        } => "Device storage is full; recent changes are not saved yet".to_string(),
        SyncEvent::PersistFailed { error, .. } => format!("Could not save gallery state: {error}"),
    }
}

/// Events that deserve the user's attention.
pub const fn is_failure(event: &SyncEvent) -> bool {
    matches!(
        event,
        SyncEvent::LocalPersistFailed { .. }
            | SyncEvent::UploadFailed { .. }
            | SyncEvent::RemoteDeleteFailed { .. }
            | SyncEvent::PersistFailed { .. }
    )
}

/// Print failures collected while a command ran.
pub fn report_failures(events: &mut broadcast::Receiver<SyncEvent>) {
    while let Ok(event) = events.try_recv() {
        if is_failure(&event) {
            eprintln!("{}", describe_event(&event));
        }
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn added_relative(record: &ImageRecord, now_ms: i64) -> String {
    record.id.batch_millis().map_or_else(
        || "-".to_string(),
        |added| format_relative_time(added, now_ms),
    )
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
