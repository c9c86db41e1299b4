//! Data models for Shoebox

mod image;
mod snapshot;

pub use image::{ImageId, ImageRecord, ImageStatus};
pub use snapshot::{GallerySnapshot, NormalizeReport, QueueKind, SaveEntry, WorkQueues};
