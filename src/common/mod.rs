pub mod commands;
pub mod events;
pub mod types;

pub use commands::SessionCommand;
pub use events::{ErrorEvent, FeedEvent, SessionEvent};
pub use types::{ChatMessage, DEFAULT_FEED, MessageDraft, OrderKey};
