//! Shared cross-interface state types.

use std::fmt;

use crate::engine::GalleryView;
use crate::models::ImageStatus;

/// Summary sync state shown in the connectivity badge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    /// Derive the badge state from a published gallery view.
    #[must_use]
    pub fn from_view(view: &GalleryView) -> Self {
        if !view.connected {
            return Self::Offline;
        }
        if view
            .records
            .iter()
            .any(|record| record.status == ImageStatus::UploadFailed)
        {
            return Self::Error;
        }
        let busy = view.pending_uploads > 0
            || view.pending_remote_deletes > 0
            || view
                .records
                .iter()
                .any(|record| record.status != ImageStatus::Uploaded);
        if busy {
            Self::Syncing
        } else {
            Self::Synced
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
