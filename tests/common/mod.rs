#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use flash_feed::storage::Appended;
use flash_feed::{
    BackendError, ChatMessage, FeedBackend, FeedCache, FeedDatabase, FeedEvent, MessageDraft,
    RetryPolicy, SubscriptionHandle,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

/// In-memory SQLite feed that fails on demand.
pub struct FlakyBackend {
    inner: FeedDatabase,
    pub failing_reads: Arc<AtomicU32>,
    pub failing_snapshots: Arc<AtomicU32>,
    pub failing_appends: Arc<AtomicU32>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: FeedDatabase::in_memory().unwrap(),
            failing_reads: Arc::new(AtomicU32::new(0)),
            failing_snapshots: Arc::new(AtomicU32::new(0)),
            failing_appends: Arc::new(AtomicU32::new(0)),
        }
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

impl FeedBackend for FlakyBackend {
    fn append(&mut self, feed: &str, draft: &MessageDraft) -> Result<Appended, BackendError> {
        if take_failure(&self.failing_appends) {
            return Err(BackendError::Unavailable("append refused".into()));
        }
        self.inner.append(feed, draft)
    }

    fn read_all(&self, feed: &str) -> Result<Vec<ChatMessage>, BackendError> {
        if take_failure(&self.failing_snapshots) {
            return Err(BackendError::Unavailable("snapshot refused".into()));
        }
        self.inner.read_all(feed)
    }

    fn read_after(&self, feed: &str, watermark: u64) -> Result<Vec<ChatMessage>, BackendError> {
        if take_failure(&self.failing_reads) {
            return Err(BackendError::Unavailable("read refused".into()));
        }
        self.inner.read_after(feed, watermark)
    }

    fn tail(&self, feed: &str) -> Result<Option<ChatMessage>, BackendError> {
        self.inner.tail(feed)
    }

    fn len(&self, feed: &str) -> Result<usize, BackendError> {
        self.inner.len(feed)
    }
}

pub async fn next_event(subscription: &mut SubscriptionHandle) -> FeedEvent {
    tokio::time::timeout(WAIT, subscription.recv())
        .await
        .expect("timed out waiting for a feed event")
        .expect("subscription ended")
}

/// Apply events to `cache` until it holds `len` messages. Returns the events seen.
pub async fn sync_until(
    subscription: &mut SubscriptionHandle,
    cache: &mut FeedCache,
    len: usize,
) -> Vec<FeedEvent> {
    let mut seen = Vec::new();
    while cache.len() < len {
        let event = next_event(subscription).await;
        seen.push(event.clone());
        cache.apply(event);
    }
    seen
}

pub fn bodies(messages: &[ChatMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.body.as_str()).collect()
}
