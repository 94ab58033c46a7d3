use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FeedError, Result};

/// Name of the default collection messages are written to.
pub const DEFAULT_FEED: &str = "messages";

/// A message committed to a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub feed: String,
    /// Commit position assigned by the store.
    pub seq: u64,
    pub sender: String,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub sent_at: i64,
}

impl ChatMessage {
    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            sent_at: self.sent_at,
            seq: self.seq,
        }
    }

    /// True when `identity` is the sender of this message.
    pub fn is_from(&self, identity: Option<&str>) -> bool {
        identity == Some(self.sender.as_str())
    }
}

/// Sort key of a feed: `sent_at`, ties broken by commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    pub sent_at: i64,
    pub seq: u64,
}

/// A message that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub sent_at: i64,
}

impl MessageDraft {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::at(sender, body, Utc::now().timestamp_millis())
    }

    pub fn at(sender: impl Into<String>, body: impl Into<String>, sent_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            body: body.into(),
            sent_at,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sender.trim().is_empty() {
            return Err(FeedError::Validation { field: "sender" });
        }
        if self.body.trim().is_empty() {
            return Err(FeedError::Validation { field: "body" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(seq: u64, sent_at: i64) -> ChatMessage {
        ChatMessage {
            id: format!("m{seq}"),
            feed: DEFAULT_FEED.to_string(),
            seq,
            sender: "alice@x.com".to_string(),
            body: "hi".to_string(),
            sent_at,
        }
    }

    #[test]
    fn order_key_sorts_by_time_then_commit_order() {
        let early = message(7, 100).order_key();
        let tied_first = message(2, 200).order_key();
        let tied_second = message(3, 200).order_key();

        assert!(early < tied_first);
        assert!(tied_first < tied_second);
    }

    #[test]
    fn blank_fields_fail_validation() {
        let err = MessageDraft::new("", "hi").validate().unwrap_err();
        assert!(matches!(err, FeedError::Validation { field: "sender" }));

        let err = MessageDraft::new("alice@x.com", "   ").validate().unwrap_err();
        assert!(matches!(err, FeedError::Validation { field: "body" }));

        assert!(MessageDraft::new("alice@x.com", "hi").validate().is_ok());
    }

    #[test]
    fn is_from_compares_sender() {
        let msg = message(1, 1);
        assert!(msg.is_from(Some("alice@x.com")));
        assert!(!msg.is_from(Some("bob@x.com")));
        assert!(!msg.is_from(None));
    }
}
