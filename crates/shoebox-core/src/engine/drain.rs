//! Queue drain loops.
//!
//! A drain claims its queue's slot, then repeatedly takes the front entry
//! under the state lock. Finding the queue empty and giving the slot back
//! happen in the same critical section, so an entry pushed while a drain is
//! running is always picked up by that drain.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{State, SyncEngine, SyncEvent};
use crate::models::{ImageId, ImageStatus, QueueKind, SaveEntry};
use crate::storage::RemoteError;
use crate::Result;

/// Exclusive right to drain one queue. Dropping it gives the right back.
struct DrainSlot<'a> {
    engine: &'a SyncEngine,
    kind: QueueKind,
    held: bool,
}

impl DrainSlot<'_> {
    fn release(&mut self, state: &mut State) {
        state.draining.remove(&self.kind);
        self.held = false;
    }
}

impl Drop for DrainSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.engine.state().draining.remove(&self.kind);
        }
    }
}

struct UploadJob {
    id: ImageId,
    key: String,
    path: PathBuf,
}

enum UploadOutcome {
    Done(String),
    /// Network trouble; the record goes back to `Pending`
    Transient(String),
    Failed(String),
}

/// Remote keys seen by the pre-check, fetched at most once per drain.
enum Listing {
    Unknown,
    Known(HashSet<String>),
    Unavailable,
}

impl SyncEngine {
    fn claim(&self, kind: QueueKind) -> Option<DrainSlot<'_>> {
        if self.state().draining.insert(kind) {
            Some(DrainSlot {
                engine: self,
                kind,
                held: true,
            })
        } else {
            tracing::debug!("{} drain already running", kind.as_str());
            None
        }
    }

    /// Copy picked images into app storage and queue them for upload.
    pub(super) async fn drain_save(&self) {
        let Some(mut slot) = self.claim(QueueKind::Save) else {
            return;
        };

        let mut processed = 0_usize;
        loop {
            let next = self.with_state(|state| {
                let entry = state.snapshot.queues.save.front().cloned();
                if entry.is_none() {
                    slot.release(state);
                }
                entry
            });
            let Some(entry) = next else {
                break;
            };

            let copied = self
                .inner
                .deps
                .asset_store
                .persist(&entry.source, &entry.id)
                .await;
            if let Some(orphan) = self.update(|state| self.finish_save(state, &entry, copied)) {
                if let Err(error) = self.inner.deps.asset_store.delete(&orphan).await {
                    tracing::warn!("Failed to remove orphaned copy {}: {error}", orphan.display());
                }
            }
            processed += 1;
        }

        if processed > 0 {
            tracing::debug!("Saved {processed} picked images");
            self.persist().await;
        }
        self.drain_upload().await;
    }

    /// Apply a finished copy. Returns a file to delete when its record is gone.
    fn finish_save(
        &self,
        state: &mut State,
        entry: &SaveEntry,
        copied: Result<PathBuf>,
    ) -> Option<PathBuf> {
        state
            .snapshot
            .queues
            .save
            .retain(|queued| queued.id != entry.id);

        match copied {
            Ok(path) => {
                let Some(record) = state.snapshot.record_mut(&entry.id) else {
                    tracing::debug!("{} was removed while copying", entry.id);
                    return Some(path);
                };
                record.local_path = Some(path);
                if record.status.awaits_upload() {
                    state.snapshot.queues.push_upload(entry.id.clone());
                }
                None
            }
            Err(error) => {
                tracing::warn!("Dropping {}: {error}", entry.id);
                let removed_meanwhile = state
                    .snapshot
                    .record(&entry.id)
                    .map_or(true, |record| record.status == ImageStatus::DeletionQueued);
                if !removed_meanwhile {
                    state.snapshot.forget(&entry.id);
                }
                self.emit(SyncEvent::LocalPersistFailed {
                    id: entry.id.clone(),
                    error: error.to_string(),
                });
                None
            }
        }
    }

    /// Upload queued records one at a time while connected.
    pub(super) async fn drain_upload(&self) {
        let Some(mut slot) = self.claim(QueueKind::Upload) else {
            return;
        };

        let mut listing = Listing::Unknown;
        loop {
            let Some(job) = self.update(|state| start_upload(state, &mut slot)) else {
                break;
            };

            if !self.persist().await {
                self.update(|state| abort_upload(state, &job.id));
                break;
            }

            let outcome = self.run_upload(&job, &mut listing).await;
            let stop = matches!(outcome, UploadOutcome::Transient(_));
            self.update(|state| self.finish_upload(state, &job, outcome));
            self.persist().await;
            if stop {
                break;
            }
        }
        drop(slot);

        if self.is_connected() {
            self.drain_remote_delete().await;
        }
    }

    async fn run_upload(&self, job: &UploadJob, listing: &mut Listing) -> UploadOutcome {
        let remote = &self.inner.deps.object_store;

        if matches!(listing, Listing::Unknown) {
            *listing = match remote.list().await {
                Ok(keys) => Listing::Known(keys.into_iter().collect()),
                Err(error) if error.is_transient() => {
                    return UploadOutcome::Transient(error.to_string());
                }
                Err(error) => {
                    tracing::warn!("Upload pre-check unavailable: {error}");
                    Listing::Unavailable
                }
            };
        }
        if let Listing::Known(keys) = listing {
            if keys.contains(&job.key) {
                tracing::info!("{} already exists remotely", job.key);
                return UploadOutcome::Done(job.key.clone());
            }
        }

        let bytes = match self.inner.deps.asset_store.read(&job.path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                return UploadOutcome::Failed(format!(
                    "Failed to read {}: {error}",
                    job.path.display()
                ));
            }
        };

        tracing::debug!("Uploading {} ({} bytes)", job.key, bytes.len());
        match remote.upload(&job.key, bytes).await {
            Ok(key) => {
                if let Listing::Known(keys) = listing {
                    keys.insert(key.clone());
                }
                UploadOutcome::Done(key)
            }
            Err(RemoteError::Network(message)) => UploadOutcome::Transient(message),
            Err(error) => UploadOutcome::Failed(error.to_string()),
        }
    }

    fn finish_upload(&self, state: &mut State, job: &UploadJob, outcome: UploadOutcome) {
        state.in_flight_upload = None;
        let awaiting_local_delete = state.snapshot.queues.local_delete.contains(&job.id);
        let Some(record) = state.snapshot.record_mut(&job.id) else {
            tracing::warn!("{} vanished during upload", job.id);
            return;
        };

        if record.status == ImageStatus::DeletionQueued {
            // The request may have landed whatever it reported.
            let key = match outcome {
                UploadOutcome::Done(key) => key,
                UploadOutcome::Transient(_) | UploadOutcome::Failed(_) => job.key.clone(),
            };
            tracing::info!("{} was removed during upload; scheduling cleanup of {key}", job.id);
            record.remote_key = Some(key);
            let queues = &mut state.snapshot.queues;
            if !awaiting_local_delete && !queues.remote_delete.contains(&job.id) {
                queues.remote_delete.push_back(job.id.clone());
            }
            return;
        }

        match outcome {
            UploadOutcome::Done(key) => {
                tracing::info!("Uploaded {} as {key}", job.id);
                record.mark_uploaded(key.clone(), Utc::now());
                self.emit(SyncEvent::Uploaded {
                    id: job.id.clone(),
                    remote_key: key,
                });
            }
            UploadOutcome::Transient(error) => {
                tracing::info!("Upload of {} interrupted: {error}", job.id);
                record.mark_pending();
                state.snapshot.queues.upload.push_front(job.id.clone());
            }
            UploadOutcome::Failed(error) => {
                tracing::warn!("Upload of {} failed: {error}", job.id);
                record.mark_failed(error.clone());
                self.emit(SyncEvent::UploadFailed {
                    id: job.id.clone(),
                    error,
                });
            }
        }
    }

    /// Delete local files of removed records.
    pub(super) async fn drain_local_delete(&self) {
        let Some(mut slot) = self.claim(QueueKind::LocalDelete) else {
            return;
        };

        loop {
            let next = self.with_state(|state| {
                let Some(id) = state.snapshot.queues.local_delete.front().cloned() else {
                    slot.release(state);
                    return None;
                };
                let path = state
                    .snapshot
                    .record(&id)
                    .and_then(|record| record.local_path.clone());
                Some((id, path))
            });
            let Some((id, path)) = next else {
                break;
            };

            if let Some(path) = &path {
                if let Err(error) = self.inner.deps.asset_store.delete(path).await {
                    tracing::warn!("Failed to delete {}: {error}", path.display());
                    break;
                }
            }

            if self.update(|state| finish_local_delete(state, &id, path.as_deref())) {
                self.persist().await;
            }
        }
        drop(slot);

        if self.is_connected() {
            self.drain_remote_delete().await;
        }
    }

    /// Delete remote objects of removed records while connected.
    pub(super) async fn drain_remote_delete(&self) {
        let Some(mut slot) = self.claim(QueueKind::RemoteDelete) else {
            return;
        };

        loop {
            let Some((id, key)) = self.update(|state| next_remote_delete(state, &mut slot)) else {
                break;
            };

            match self.inner.deps.object_store.delete(&key).await {
                Ok(()) => {
                    self.update(|state| {
                        if state.snapshot.queues.remote_delete.front() == Some(&id) {
                            state.snapshot.queues.remote_delete.pop_front();
                        }
                        state.snapshot.forget(&id);
                    });
                    tracing::info!("Deleted remote object {key}");
                    self.emit(SyncEvent::RemoteDeleted {
                        id,
                        remote_key: key,
                    });
                    self.persist().await;
                }
                Err(error) => {
                    tracing::warn!("Remote delete of {key} failed: {error}");
                    self.emit(SyncEvent::RemoteDeleteFailed {
                        id,
                        error: error.to_string(),
                    });
                    break;
                }
            }
        }
    }
}

fn start_upload(state: &mut State, slot: &mut DrainSlot<'_>) -> Option<UploadJob> {
    loop {
        if !state.connected {
            slot.release(state);
            return None;
        }
        let Some(id) = state.snapshot.queues.upload.pop_front() else {
            slot.release(state);
            return None;
        };

        let Some(record) = state.snapshot.record_mut(&id) else {
            continue;
        };
        let (Some(path), Some(key)) = (record.local_path.clone(), record.object_key()) else {
            continue;
        };
        if !record.status.awaits_upload() {
            continue;
        }

        record.mark_uploading();
        state.in_flight_upload = Some(id.clone());
        return Some(UploadJob { id, key, path });
    }
}

/// Undo `start_upload` when the `Uploading` mark could not be persisted.
fn abort_upload(state: &mut State, id: &ImageId) {
    state.in_flight_upload = None;
    if let Some(record) = state.snapshot.record_mut(id) {
        if record.status == ImageStatus::Uploading {
            record.mark_pending();
            state.snapshot.queues.upload.push_front(id.clone());
        }
    }
}

/// Settle the front local-delete entry. Returns whether state changed.
fn finish_local_delete(state: &mut State, id: &ImageId, deleted: Option<&Path>) -> bool {
    let queues = &state.snapshot.queues;
    if queues.local_delete.front() != Some(id) {
        return false;
    }

    let Some(record) = state.snapshot.record(id) else {
        state.snapshot.queues.local_delete.pop_front();
        return true;
    };
    if record.local_path.as_deref() != deleted {
        // A copy landed after we looked; delete that one too.
        return false;
    }
    let has_remote = record.remote_key.is_some();

    state.snapshot.queues.local_delete.pop_front();
    if has_remote {
        tracing::debug!("{id} local copy removed; remote cleanup queued");
        state.snapshot.queues.remote_delete.push_back(id.clone());
    } else if state.in_flight_upload.as_ref() == Some(id) {
        tracing::debug!("{id} local copy removed; waiting for its upload to settle");
    } else {
        state.snapshot.forget(id);
    }
    true
}

fn next_remote_delete(state: &mut State, slot: &mut DrainSlot<'_>) -> Option<(ImageId, String)> {
    loop {
        if !state.connected {
            slot.release(state);
            return None;
        }
        let Some(id) = state.snapshot.queues.remote_delete.front().cloned() else {
            slot.release(state);
            return None;
        };

        let key = state
            .snapshot
            .record(&id)
            .and_then(|record| record.remote_key.clone().or_else(|| record.object_key()));
        match key {
            Some(key) => return Some((id, key)),
            None => {
                // Nothing ever reached the bucket.
                state.snapshot.queues.remote_delete.pop_front();
                state.snapshot.forget(&id);
            }
        }
    }
}
