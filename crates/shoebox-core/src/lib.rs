//! shoebox-core - Core library for Shoebox
//!
//! This crate contains the gallery models, the durable record store, the
//! local and remote asset stores, and the offline-first sync engine used by
//! every Shoebox interface.

pub mod assets;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod state;
pub mod storage;
pub mod util;

pub use engine::{EngineDeps, GalleryView, SyncEngine, SyncEvent};
pub use error::{Error, Result};
pub use models::{ImageId, ImageRecord, ImageStatus};
pub use state::SyncState;
