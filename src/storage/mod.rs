pub mod database;
pub mod feed_db;
pub mod identity_db;
pub mod models;

pub use feed_db::FeedDatabase;
pub use identity_db::IdentityDatabase;
pub use models::{Appended, Identity};

use std::fs;
use std::path::Path;

use crate::common::{ChatMessage, MessageDraft};
use crate::error::BackendError;

/// Ordered listen-and-append store the feed engine runs on.
///
/// Implementations are driven from a single store task, so they only need
/// to be `Send`. The live part of a backend is provided by the store itself.
pub trait FeedBackend: Send + 'static {
    /// Durably append `draft` to `feed`, assigning the next commit position.
    fn append(&mut self, feed: &str, draft: &MessageDraft) -> Result<Appended, BackendError>;

    fn read_all(&self, feed: &str) -> Result<Vec<ChatMessage>, BackendError>;

    /// Messages of `feed` whose `seq` is greater than `watermark`, in order.
    fn read_after(&self, feed: &str, watermark: u64) -> Result<Vec<ChatMessage>, BackendError>;

    fn tail(&self, feed: &str) -> Result<Option<ChatMessage>, BackendError>;

    fn len(&self, feed: &str) -> Result<usize, BackendError>;
}

/// Ensure the directory holding `path` exists
pub fn ensure_parent_dir<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
