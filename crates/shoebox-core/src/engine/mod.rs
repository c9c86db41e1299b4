//! Offline-first sync engine.
//!
//! The engine owns the gallery state machine. Every user intent is applied to
//! the in-memory snapshot, published to subscribers and written to the record
//! store before any dependent network call starts. Four queues carry the
//! outstanding work, each drained by at most one loop at a time:
//!
//! - save: picked images waiting to be copied into app storage
//! - upload: local copies waiting for the remote bucket
//! - local delete: removed images whose local file must go
//! - remote delete: removed images whose remote object must go
//!
//! State lives behind a synchronous mutex that is never held across an
//! `.await`, so different queues make progress concurrently while each record
//! is only ever mutated by one step at a time.

mod drain;
#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::assets::AssetStore;
use crate::db::RecordStore;
use crate::models::{
    GallerySnapshot, ImageId, ImageRecord, ImageStatus, NormalizeReport, QueueKind, SaveEntry,
};
use crate::storage::ObjectStore;
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 64;

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EngineDeps {
    pub record_store: Arc<dyn RecordStore>,
    pub asset_store: Arc<dyn AssetStore>,
    pub object_store: Arc<dyn ObjectStore>,
}

/// Immutable view published to subscribers after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalleryView {
    /// Visible records, newest first
    pub records: Vec<ImageRecord>,
    pub connected: bool,
    /// Visible records not yet stored remotely
    pub pending_uploads: usize,
    /// Remote objects still waiting to be deleted
    pub pending_remote_deletes: usize,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A picked image could not be copied and was dropped.
    LocalPersistFailed { id: ImageId, error: String },
    Uploaded { id: ImageId, remote_key: String },
    UploadFailed { id: ImageId, error: String },
    RemoteDeleted { id: ImageId, remote_key: String },
    RemoteDeleteFailed { id: ImageId, error: String },
    /// A snapshot write failed; in-memory state is ahead of disk.
    PersistFailed { error: String, storage_full: bool },
}

struct State {
    snapshot: GallerySnapshot,
    connected: bool,
    draining: HashSet<QueueKind>,
    /// Record whose upload request is on the wire
    in_flight_upload: Option<ImageId>,
    last_batch_millis: i64,
}

impl State {
    fn view(&self) -> GalleryView {
        let records: Vec<ImageRecord> = self.snapshot.visible().cloned().collect();
        let pending_uploads = records
            .iter()
            .filter(|record| record.status != ImageStatus::Uploaded)
            .count();
        GalleryView {
            records,
            connected: self.connected,
            pending_uploads,
            pending_remote_deletes: self.snapshot.queues.remote_delete.len(),
        }
    }

    /// Next batch timestamp, strictly greater than any handed out before.
    fn next_batch_millis(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_batch_millis = now.max(self.last_batch_millis + 1);
        self.last_batch_millis
    }
}

struct Inner {
    deps: EngineDeps,
    state: Mutex<State>,
    /// Serializes snapshot writes so the newest state always lands last
    persist_lock: tokio::sync::Mutex<()>,
    view: watch::Sender<GalleryView>,
    connectivity: watch::Sender<bool>,
    events: broadcast::Sender<SyncEvent>,
}

/// Handle to the sync engine. Clones share the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("view", &*self.inner.view.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Load the stored gallery, repair it and start an engine on top of it.
    ///
    /// Records whose local file vanished are dropped, or scheduled for remote
    /// cleanup when a remote copy exists. Interrupted work is re-queued. No
    /// queue is drained until [`SyncEngine::resume`] or another operation runs.
    pub async fn open(deps: EngineDeps, connected: bool) -> Result<Self> {
        let mut snapshot = deps.record_store.load().await?;
        recover_missing_assets(&mut snapshot, deps.asset_store.as_ref()).await;

        let report = snapshot.normalize();
        if report != NormalizeReport::default() {
            tracing::info!("Recovered gallery snapshot: {report:?}");
        }
        for problem in snapshot.violations() {
            tracing::warn!("Gallery snapshot inconsistency: {problem}");
        }
        deps.record_store.save(&snapshot).await?;

        let state = State {
            last_batch_millis: snapshot.latest_batch_millis().unwrap_or(0),
            snapshot,
            connected,
            draining: HashSet::new(),
            in_flight_upload: None,
        };
        let (view, _) = watch::channel(state.view());
        let (connectivity, _) = watch::channel(connected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::info!(
            "Opened gallery with {} records ({})",
            state.snapshot.records.len(),
            if connected { "online" } else { "offline" }
        );

        Ok(Self {
            inner: Arc::new(Inner {
                deps,
                state: Mutex::new(state),
                persist_lock: tokio::sync::Mutex::new(()),
                view,
                connectivity,
                events,
            }),
        })
    }

    /// Drain whatever work the stored snapshot left outstanding.
    pub async fn resume(&self) {
        tokio::join!(self.drain_save(), self.drain_local_delete());
        if self.is_connected() {
            tokio::join!(self.drain_upload(), self.drain_remote_delete());
        }
    }

    /// Add picked images to the gallery.
    ///
    /// Records appear immediately as `Pending`; the call returns once the local
    /// copies (and, when online, the uploads this call started) are done.
    pub async fn add_images(&self, sources: Vec<PathBuf>) -> Vec<ImageId> {
        if sources.is_empty() {
            return Vec::new();
        }

        let ids = self.update(|state| {
            let batch = state.next_batch_millis();
            let mut ids = Vec::with_capacity(sources.len());
            let mut records = Vec::with_capacity(sources.len());
            for (index, source) in sources.into_iter().enumerate() {
                let id = ImageId::from_batch(batch, index);
                records.push(ImageRecord::pending(id.clone()));
                state.snapshot.queues.save.push_back(SaveEntry {
                    id: id.clone(),
                    source,
                });
                ids.push(id);
            }
            state.snapshot.records.splice(0..0, records);
            ids
        });
        tracing::info!("Added {} images", ids.len());

        self.persist().await;
        self.drain_save().await;
        ids
    }

    /// Remove a visible image.
    ///
    /// The record disappears from the view at once and any queued upload is
    /// cancelled. Local cleanup runs regardless of connectivity; remote cleanup
    /// waits for a connection.
    pub async fn remove_image(&self, id: &ImageId) -> Result<()> {
        let removed = self.update(|state| {
            let record = state
                .snapshot
                .record_mut(id)
                .filter(|record| record.status.is_visible())?;
            record.mark_deletion_queued(Utc::now());
            let cancelled = state.snapshot.queues.remove(id);
            state.snapshot.queues.local_delete.push_back(id.clone());
            Some(cancelled)
        });

        let Some(cancelled) = removed else {
            tracing::warn!("Ignoring removal of unknown image {id}");
            return Err(Error::NotFound(id.to_string()));
        };
        if let Some(kind) = cancelled {
            tracing::debug!("Cancelled {} entry for {id}", kind.as_str());
        }
        tracing::info!("Removed image {id}");

        self.persist().await;
        self.drain_local_delete().await;
        Ok(())
    }

    /// Feed a connectivity observation. Only changes of value have an effect.
    ///
    /// Going offline takes effect at once: a running drain stops before its
    /// next network call. Going online returns after the resulting drains.
    pub async fn on_connectivity_changed(&self, connected: bool) {
        if self.apply_connectivity(connected) {
            self.sync_after_reconnect().await;
        }
    }

    /// Apply every value `receiver` publishes, starting with the current one.
    ///
    /// Edges are applied as soon as they arrive. Reconnect drains run on their
    /// own tasks so a later disconnect is never stuck behind them.
    pub fn follow_connectivity(&self, mut receiver: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let connected = *receiver.borrow_and_update();
                if engine.apply_connectivity(connected) {
                    let engine = engine.clone();
                    tokio::spawn(async move { engine.sync_after_reconnect().await });
                }
                if receiver.changed().await.is_err() {
                    break;
                }
            }
            tracing::debug!("Connectivity source closed");
        })
    }

    /// Record a connectivity value. Returns whether it was an online edge.
    fn apply_connectivity(&self, connected: bool) -> bool {
        let changed = self.update(|state| {
            let changed = state.connected != connected;
            state.connected = connected;
            changed
        });
        if !changed {
            return false;
        }

        self.inner.connectivity.send_replace(connected);
        if !connected {
            tracing::info!("Offline; sync paused");
        }
        connected
    }

    async fn sync_after_reconnect(&self) {
        let requeued = self.update(|state| {
            let in_flight = state.in_flight_upload.clone();
            let stranded: Vec<ImageId> = state
                .snapshot
                .stranded_uploads(in_flight.as_ref())
                .collect();
            stranded
                .into_iter()
                .filter(|id| state.snapshot.queues.push_upload(id.clone()))
                .count()
        });
        tracing::info!("Online; retrying {requeued} uploads");
        if requeued > 0 {
            self.persist().await;
        }

        tokio::join!(self.drain_upload(), self.drain_remote_delete());
    }

    /// Visible records, newest first.
    pub fn records(&self) -> Vec<ImageRecord> {
        self.inner.view.borrow().records.clone()
    }

    pub fn view(&self) -> GalleryView {
        self.inner.view.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.with_state(|state| state.connected)
    }

    pub fn subscribe_records(&self) -> watch::Receiver<GalleryView> {
        self.inner.view.subscribe()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<bool> {
        self.inner.connectivity.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Full current snapshot, hidden records and queues included.
    pub fn snapshot(&self) -> GallerySnapshot {
        self.with_state(|state| state.snapshot.clone())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(&self, read: impl FnOnce(&mut State) -> R) -> R {
        read(&mut self.state())
    }

    /// Mutate state and publish the resulting view.
    fn update<R>(&self, apply: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state();
        let result = apply(&mut state);
        self.inner.view.send_replace(state.view());
        result
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        self.inner.events.send(event).ok();
    }

    /// Write the current snapshot. Returns whether the write is durable.
    async fn persist(&self) -> bool {
        let _guard = self.inner.persist_lock.lock().await;
        let snapshot = self.snapshot();
        match self.inner.deps.record_store.save(&snapshot).await {
            Ok(()) => true,
            Err(error) => {
                let storage_full = error.is_storage_full();
                if storage_full {
                    tracing::error!("Gallery storage is full; snapshot not saved: {error}");
                } else {
                    tracing::error!("Failed to persist gallery snapshot: {error}");
                }
                self.emit(SyncEvent::PersistFailed {
                    error: error.to_string(),
                    storage_full,
                });
                false
            }
        }
    }
}

/// Handle records whose local file disappeared while the app was closed.
async fn recover_missing_assets(snapshot: &mut GallerySnapshot, assets: &dyn AssetStore) {
    let mut dropped = Vec::new();
    let mut cleanup = Vec::new();

    for record in snapshot.records.iter().filter(|record| record.status.is_visible()) {
        let present = match record.local_file() {
            Some(path) => assets.exists(path).await,
            None => snapshot.queues.save.iter().any(|entry| entry.id == record.id),
        };
        if present {
            continue;
        }
        if record.remote_key.is_some() {
            cleanup.push(record.id.clone());
        } else {
            dropped.push(record.id.clone());
        }
    }

    for id in &dropped {
        tracing::info!("Dropping {id}: local file is gone");
        snapshot.forget(id);
    }
    for id in cleanup {
        tracing::info!("Local file of {id} is gone; scheduling remote cleanup");
        snapshot.queues.remove(&id);
        if let Some(record) = snapshot.record_mut(&id) {
            record.mark_deletion_queued(Utc::now());
        }
        snapshot.queues.remote_delete.push_back(id);
    }
}
