use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::DEFAULT_FEED;
use crate::feed::OverflowPolicy;
use crate::feed::subscription::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_POLL_INTERVAL_MS};
use crate::retry::RetryPolicy;
use crate::storage::ensure_parent_dir;

pub const DEFAULT_CONFIG_PATH: &str = "config/feed.json";
pub const DEFAULT_DATABASE_PATH: &str = "data/feed.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    /// Collection the chat screen reads and writes.
    pub feed: String,
    /// Per-subscription event queue size.
    pub channel_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Milliseconds between rereads that pick up other writers' messages.
    pub poll_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            feed: DEFAULT_FEED.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry: RetryPolicy::default(),
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
