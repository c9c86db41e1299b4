//! Durable gallery snapshot: the record list plus the work queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::image::{ImageId, ImageRecord, ImageStatus};

/// A picked image waiting to be copied into app storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntry {
    pub id: ImageId,
    /// Handle returned by the image picker
    pub source: PathBuf,
}

/// The queue a record can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Save,
    Upload,
    LocalDelete,
    RemoteDelete,
}

impl QueueKind {
    pub const ALL: [Self; 4] = [
        Self::Save,
        Self::Upload,
        Self::LocalDelete,
        Self::RemoteDelete,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save_queue",
            Self::Upload => "upload_queue",
            Self::LocalDelete => "local_delete_queue",
            Self::RemoteDelete => "remote_delete_queue",
        }
    }

    /// Whether a record in `status` may sit in this queue.
    fn admits(self, record: &ImageRecord) -> bool {
        match self {
            Self::Save => {
                matches!(record.status, ImageStatus::Pending) && record.local_path.is_none()
            }
            Self::Upload => record.status.awaits_upload() && record.local_path.is_some(),
            Self::LocalDelete | Self::RemoteDelete => {
                matches!(record.status, ImageStatus::DeletionQueued)
            }
        }
    }
}

/// FIFO work queues, persisted independently of the record list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkQueues {
    #[serde(default)]
    pub save: VecDeque<SaveEntry>,
    #[serde(default)]
    pub upload: VecDeque<ImageId>,
    #[serde(default)]
    pub local_delete: VecDeque<ImageId>,
    #[serde(default)]
    pub remote_delete: VecDeque<ImageId>,
}

impl WorkQueues {
    /// Queue currently holding `id`, if any.
    #[must_use]
    pub fn membership(&self, id: &ImageId) -> Option<QueueKind> {
        QueueKind::ALL
            .into_iter()
            .find(|kind| self.ids(*kind).any(|queued| queued == id))
    }

    #[must_use]
    pub fn is_queued(&self, id: &ImageId) -> bool {
        self.membership(id).is_some()
    }

    /// Ids held by one queue, front first.
    pub fn ids(&self, kind: QueueKind) -> Box<dyn Iterator<Item = &ImageId> + '_> {
        match kind {
            QueueKind::Save => Box::new(self.save.iter().map(|entry| &entry.id)),
            QueueKind::Upload => Box::new(self.upload.iter()),
            QueueKind::LocalDelete => Box::new(self.local_delete.iter()),
            QueueKind::RemoteDelete => Box::new(self.remote_delete.iter()),
        }
    }

    #[must_use]
    pub fn len(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Save => self.save.len(),
            QueueKind::Upload => self.upload.len(),
            QueueKind::LocalDelete => self.local_delete.len(),
            QueueKind::RemoteDelete => self.remote_delete.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        QueueKind::ALL.into_iter().all(|kind| self.len(kind) == 0)
    }

    /// Remove `id` from every queue, returning the queue it was found in.
    pub fn remove(&mut self, id: &ImageId) -> Option<QueueKind> {
        let found = self.membership(id);
        self.save.retain(|entry| &entry.id != id);
        self.upload.retain(|queued| queued != id);
        self.local_delete.retain(|queued| queued != id);
        self.remote_delete.retain(|queued| queued != id);
        found
    }

    /// Append `id` to the upload queue unless it is already queued anywhere.
    pub fn push_upload(&mut self, id: ImageId) -> bool {
        if self.is_queued(&id) {
            return false;
        }
        self.upload.push_back(id);
        true
    }
}

/// Everything the record store persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GallerySnapshot {
    /// All known records, display order (newest first)
    pub records: Vec<ImageRecord>,
    pub queues: WorkQueues,
}

/// What `GallerySnapshot::normalize` changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub dropped_entries: usize,
    pub reverted_uploads: usize,
    pub requeued_uploads: usize,
    pub rescheduled_deletes: usize,
}

impl GallerySnapshot {
    #[must_use]
    pub fn record(&self, id: &ImageId) -> Option<&ImageRecord> {
        self.records.iter().find(|record| &record.id == id)
    }

    pub fn record_mut(&mut self, id: &ImageId) -> Option<&mut ImageRecord> {
        self.records.iter_mut().find(|record| &record.id == id)
    }

    /// Drop a record and any queue entries pointing at it.
    pub fn forget(&mut self, id: &ImageId) -> Option<ImageRecord> {
        self.queues.remove(id);
        let position = self.records.iter().position(|record| &record.id == id)?;
        Some(self.records.remove(position))
    }

    /// Visible records, newest first.
    pub fn visible(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records
            .iter()
            .filter(|record| record.status.is_visible())
    }

    /// Largest batch timestamp among known ids.
    #[must_use]
    pub fn latest_batch_millis(&self) -> Option<i64> {
        self.records
            .iter()
            .filter_map(|record| record.id.batch_millis())
            .max()
    }

    /// Records that need an upload attempt but sit in no queue.
    pub fn stranded_uploads<'a>(
        &'a self,
        in_flight: Option<&'a ImageId>,
    ) -> impl Iterator<Item = ImageId> + 'a {
        self.records
            .iter()
            .filter(|record| record.status.awaits_upload() && record.local_path.is_some())
            .filter(move |record| Some(&record.id) != in_flight)
            .filter(|record| !self.queues.is_queued(&record.id))
            .map(|record| record.id.clone())
    }

    /// Repair a snapshot read back after a restart.
    ///
    /// Interrupted uploads revert to `Pending`, queue entries for unknown or
    /// ineligible records are dropped (first occurrence wins), stranded
    /// uploads are re-queued and deletions orphaned by an interrupted upload
    /// are rescheduled for remote cleanup.
    pub fn normalize(&mut self) -> NormalizeReport {
        let mut report = NormalizeReport::default();

        for record in &mut self.records {
            if record.status == ImageStatus::Uploading {
                record.mark_pending();
                report.reverted_uploads += 1;
            }
        }

        let statuses: HashMap<ImageId, ImageRecord> = self
            .records
            .iter()
            .map(|record| (record.id.clone(), record.clone()))
            .collect();
        let mut seen = HashSet::new();
        let mut admit = |kind: QueueKind, id: &ImageId| {
            let admitted = statuses
                .get(id)
                .is_some_and(|record| kind.admits(record))
                && seen.insert(id.clone());
            if !admitted {
                report.dropped_entries += 1;
            }
            admitted
        };

        // Deletion intent outranks upload intent when a record is queued twice.
        self.queues
            .remote_delete
            .retain(|id| admit(QueueKind::RemoteDelete, id));
        self.queues
            .local_delete
            .retain(|id| admit(QueueKind::LocalDelete, id));
        self.queues.upload.retain(|id| admit(QueueKind::Upload, id));
        self.queues
            .save
            .retain(|entry| admit(QueueKind::Save, &entry.id));

        let stranded: Vec<ImageId> = self.stranded_uploads(None).collect();
        for id in stranded {
            if self.queues.push_upload(id) {
                report.requeued_uploads += 1;
            }
        }

        let orphaned: Vec<ImageId> = self
            .records
            .iter()
            .filter(|record| record.status == ImageStatus::DeletionQueued)
            .filter(|record| !self.queues.is_queued(&record.id))
            .map(|record| record.id.clone())
            .collect();
        for id in orphaned {
            if let Some(record) = self.record_mut(&id) {
                if record.remote_key.is_none() {
                    record.remote_key = record.object_key();
                }
            }
            self.queues.remote_delete.push_back(id);
            report.rescheduled_deletes += 1;
        }

        report
    }

    /// Every violated invariant, for diagnostics and tests.
    #[must_use]
    pub fn violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut ids = HashSet::new();
        for record in &self.records {
            if !ids.insert(&record.id) {
                problems.push(format!("{}: duplicate record id", record.id));
            }
            if let Err(problem) = record.check_invariants() {
                problems.push(problem);
            }
        }

        let mut queued = HashSet::new();
        for kind in QueueKind::ALL {
            for id in self.queues.ids(kind) {
                if !ids.contains(id) {
                    problems.push(format!("{id}: {} entry without record", kind.as_str()));
                }
                if !queued.insert(id) {
                    problems.push(format!("{id}: queued more than once"));
                }
            }
        }
        problems
    }
}
