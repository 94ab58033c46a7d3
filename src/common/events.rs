use chrono::{DateTime, Utc};

use super::types::ChatMessage;

/// Event delivered to a feed subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Full ordered copy of the feed. Replaces whatever the observer holds.
    FullSnapshot {
        feed: String,
        messages: Vec<ChatMessage>,
    },
    /// One newly committed message, in commit order.
    IncrementalAppend(ChatMessage),
    /// The backend failed; the subscription keeps retrying.
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub feed: String,
    pub message: String,
    /// Consecutive failures so far.
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// Event sent from a chat session up to its render surface.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The cache was rebuilt from a snapshot.
    Replaced(Vec<ChatMessage>),
    Appended(ChatMessage),
    /// Delivery is failing; the cache still holds the last good state.
    Degraded(String),
    MessageSent(ChatMessage),
    SendFailed(String),
    SignedOut,
}
