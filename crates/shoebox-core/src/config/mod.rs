//! Runtime configuration for a gallery.
//!
//! Everything the engine and its adapters need is gathered here once at
//! startup and handed down explicitly.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::R2Config;
use crate::util::normalize_text_option;
use crate::{Error, Result};

const ENV_PROBE_ADDR: &str = "SHOEBOX_PROBE_ADDR";
const ENV_PROBE_TIMEOUT_SECS: &str = "SHOEBOX_PROBE_TIMEOUT_SECS";
const ENV_POLL_INTERVAL_SECS: &str = "SHOEBOX_POLL_INTERVAL_SECS";
const ENV_STABLE_POLLS: &str = "SHOEBOX_CONNECTIVITY_STABLE_POLLS";

const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:443";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 3;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_STABLE_POLLS: usize = 2;

const DATABASE_FILE: &str = "gallery.db";
const ASSETS_DIR: &str = "assets";

/// Gallery configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryConfig {
    /// Root of all local gallery state
    pub data_dir: PathBuf,
    /// `host:port` the connectivity probe connects to
    pub probe_addr: String,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    /// Consecutive agreeing polls required before a connectivity edge
    pub stable_polls: usize,
    /// Remote bucket, if one is configured
    pub remote: Option<R2Config>,
}

impl GalleryConfig {
    /// Defaults rooted at `data_dir`, with no remote.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            probe_addr: DEFAULT_PROBE_ADDR.to_string(),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            stable_polls: DEFAULT_STABLE_POLLS,
            remote: None,
        }
    }

    /// Load configuration for `data_dir` from environment variables.
    pub fn from_env(data_dir: impl Into<PathBuf>) -> Result<Self> {
        parse_config(data_dir.into(), |key| env::var(key).ok())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join(ASSETS_DIR)
    }
}

fn parse_config(data_dir: PathBuf, lookup: impl Fn(&str) -> Option<String>) -> Result<GalleryConfig> {
    let read = |key: &str| normalize_text_option(lookup(key));
    let mut config = GalleryConfig::new(data_dir);

    if let Some(addr) = read(ENV_PROBE_ADDR) {
        if !addr.contains(':') {
            return Err(Error::InvalidInput(format!(
                "{ENV_PROBE_ADDR} must be host:port, got '{addr}'"
            )));
        }
        config.probe_addr = addr;
    }
    if let Some(secs) = read(ENV_PROBE_TIMEOUT_SECS) {
        config.probe_timeout = Duration::from_secs(parse_positive(ENV_PROBE_TIMEOUT_SECS, &secs)?);
    }
    if let Some(secs) = read(ENV_POLL_INTERVAL_SECS) {
        config.poll_interval = Duration::from_secs(parse_positive(ENV_POLL_INTERVAL_SECS, &secs)?);
    }
    if let Some(polls) = read(ENV_STABLE_POLLS) {
        let polls = parse_positive(ENV_STABLE_POLLS, &polls)?;
        config.stable_polls = usize::try_from(polls).unwrap_or(usize::MAX);
    }

    config.remote = R2Config::from_lookup(&lookup)?;
    Ok(config)
}

fn parse_positive(key: &str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(Error::InvalidInput(format!(
            "{key} must be a positive integer, got '{value}'"
        ))),
    }
}
