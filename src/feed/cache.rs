use crate::common::{ChatMessage, ErrorEvent, FeedEvent};

/// How a [`FeedCache`] reacted to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    Replaced { len: usize },
    Appended,
    /// Not newer than the current tail.
    Discarded,
    Degraded,
}

/// One renderable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedRow<'a> {
    pub message: &'a ChatMessage,
    pub is_mine: bool,
}

/// Client-side ordered copy of a feed, fed by a subscription.
#[derive(Debug, Clone, Default)]
pub struct FeedCache {
    messages: Vec<ChatMessage>,
    last_error: Option<ErrorEvent>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: FeedEvent) -> CacheChange {
        match event {
            FeedEvent::FullSnapshot { messages, .. } => {
                self.replace(messages);
                CacheChange::Replaced {
                    len: self.messages.len(),
                }
            }
            FeedEvent::IncrementalAppend(message) => {
                if self.push(message) {
                    CacheChange::Appended
                } else {
                    CacheChange::Discarded
                }
            }
            FeedEvent::Error(error) => {
                log::warn!("Feed `{}` degraded: {}", error.feed, error.message);
                self.last_error = Some(error);
                CacheChange::Degraded
            }
        }
    }

    /// Replace the whole sequence.
    pub fn replace(&mut self, mut messages: Vec<ChatMessage>) {
        messages.sort_by_key(ChatMessage::order_key);
        self.messages = messages;
        self.last_error = None;
    }

    /// Append `message` if it sorts after the current tail. Returns whether
    /// it was kept.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        let newer = self
            .messages
            .last()
            .is_none_or(|tail| message.order_key() > tail.order_key());
        if newer {
            self.messages.push(message);
            self.last_error = None;
        }
        newer
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Highest commit position held, used to resume a subscription.
    pub fn watermark(&self) -> Option<u64> {
        self.messages.iter().map(|message| message.seq).max()
    }

    /// The last delivery failure, cleared by the next successful event.
    pub fn last_error(&self) -> Option<&ErrorEvent> {
        self.last_error.as_ref()
    }

    pub fn rows<'a>(&'a self, identity: Option<&'a str>) -> impl Iterator<Item = FeedRow<'a>> + 'a {
        self.messages.iter().map(move |message| FeedRow {
            message,
            is_mine: message.is_from(identity),
        })
    }
}
