//! Image record model

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::util::dotted_extension;

static IMAGE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<batch>[0-9]{1,19})-(?P<index>[0-9]{1,10})$").expect("Invalid regex")
});

/// Stable identifier for an image, derived from its pick batch.
///
/// The id is `{batch_millis}-{index}` and is assigned once, when the image is
/// picked. It is never recomputed from mutable fields and doubles as the root
/// of the remote object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Build the id for the `index`-th image of the batch picked at `batch_millis`.
    #[must_use]
    pub fn from_batch(batch_millis: i64, index: usize) -> Self {
        Self(format!("{batch_millis}-{index}"))
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Batch timestamp (Unix ms) encoded in this id.
    #[must_use]
    pub fn batch_millis(&self) -> Option<i64> {
        IMAGE_ID_PATTERN
            .captures(&self.0)
            .and_then(|caps| caps["batch"].parse().ok())
    }

    /// Remote object key for an asset of this id with the given dotted extension.
    #[must_use]
    pub fn object_key(&self, extension: &str) -> String {
        format!("{}{extension}", self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ImageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if IMAGE_ID_PATTERN.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(Error::InvalidInput(format!(
                "'{trimmed}' is not an image id (expected <batch-ms>-<index>)"
            )))
        }
    }
}

/// Sync status of an image. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageStatus {
    /// Known locally, not yet on the remote.
    Pending,
    /// An upload for this record has been issued.
    Uploading,
    /// Stored remotely under `remote_key`.
    Uploaded,
    /// Last upload attempt failed with a non-transient error.
    UploadFailed,
    /// Removed by the user; local and remote cleanup outstanding.
    DeletionQueued,
}

impl ImageStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Uploading => "Uploading",
            Self::Uploaded => "Uploaded",
            Self::UploadFailed => "UploadFailed",
            Self::DeletionQueued => "DeletionQueued",
        }
    }

    /// Whether records in this status are shown in the gallery.
    #[must_use]
    pub const fn is_visible(self) -> bool {
        !matches!(self, Self::DeletionQueued)
    }

    /// Whether a record in this status still needs an upload attempt.
    #[must_use]
    pub const fn awaits_upload(self) -> bool {
        matches!(self, Self::Pending | Self::UploadFailed)
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One locally known image and its sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Stable content identifier
    pub id: ImageId,
    /// App-private copy of the image, set once the local copy completes
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// Current sync status
    pub status: ImageStatus,
    /// Remote object key, set once the object is known to exist remotely
    #[serde(default)]
    pub remote_key: Option<String>,
    /// Error from the last failed upload
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the upload was confirmed
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// When the user asked for deletion
    #[serde(default)]
    pub deletion_queued_at: Option<DateTime<Utc>>,
}

impl ImageRecord {
    /// Create a freshly picked record.
    #[must_use]
    pub const fn pending(id: ImageId) -> Self {
        Self {
            id,
            local_path: None,
            status: ImageStatus::Pending,
            remote_key: None,
            last_error: None,
            uploaded_at: None,
            deletion_queued_at: None,
        }
    }

    /// Remote object key this record uploads to, once its local copy exists.
    #[must_use]
    pub fn object_key(&self) -> Option<String> {
        self.local_path
            .as_deref()
            .map(|path| self.id.object_key(&dotted_extension(path)))
    }

    pub fn mark_uploading(&mut self) {
        self.status = ImageStatus::Uploading;
        self.remote_key = None;
        self.last_error = None;
        self.uploaded_at = None;
    }

    pub fn mark_uploaded(&mut self, remote_key: String, at: DateTime<Utc>) {
        self.status = ImageStatus::Uploaded;
        self.remote_key = Some(remote_key);
        self.last_error = None;
        self.uploaded_at = Some(at);
    }

    /// Back to `Pending` after a transient failure.
    pub fn mark_pending(&mut self) {
        self.status = ImageStatus::Pending;
        self.remote_key = None;
        self.last_error = None;
        self.uploaded_at = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ImageStatus::UploadFailed;
        self.remote_key = None;
        self.last_error = Some(error.into());
        self.uploaded_at = None;
    }

    /// Hide the record and keep only what remote cleanup needs.
    pub fn mark_deletion_queued(&mut self, at: DateTime<Utc>) {
        self.status = ImageStatus::DeletionQueued;
        self.last_error = None;
        self.uploaded_at = None;
        self.deletion_queued_at = Some(at);
    }

    /// Local file handle, if one was ever created.
    #[must_use]
    pub fn local_file(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Check the per-status field invariants, returning the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let id = &self.id;
        match self.status {
            ImageStatus::Uploaded => {
                if self.remote_key.as_deref().map_or(true, str::is_empty) {
                    return Err(format!("{id}: Uploaded without remote key"));
                }
                if self.uploaded_at.is_none() {
                    return Err(format!("{id}: Uploaded without uploadedAt"));
                }
            }
            ImageStatus::Pending | ImageStatus::Uploading => {
                if self.remote_key.is_some() {
                    return Err(format!("{id}: {} with remote key", self.status));
                }
            }
            ImageStatus::UploadFailed => {
                if self.last_error.is_none() {
                    return Err(format!("{id}: UploadFailed without lastError"));
                }
            }
            ImageStatus::DeletionQueued => {
                if self.deletion_queued_at.is_none() {
                    return Err(format!("{id}: DeletionQueued without deletionQueuedAt"));
                }
            }
        }

        if self.status != ImageStatus::UploadFailed && self.last_error.is_some() {
            return Err(format!("{id}: lastError outside UploadFailed"));
        }
        if self.status != ImageStatus::Uploaded && self.uploaded_at.is_some() {
            return Err(format!("{id}: uploadedAt outside Uploaded"));
        }
        Ok(())
    }
}
