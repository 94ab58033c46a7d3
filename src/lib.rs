//! Real-time chat feed synchronization.
//!
//! A [`FeedStore`] owns an append-only, ordered log per feed. The
//! [`SubscriptionManager`] turns it into live subscriptions (a snapshot, then
//! incremental appends), a [`FeedCache`] mirrors one subscription on the
//! client side and the [`SendPath`] validates and appends user input.

pub mod common;
pub mod config;
pub mod error;
pub mod feed;
pub mod identity;
pub mod retry;
pub mod session;
pub mod storage;

pub use common::{ChatMessage, ErrorEvent, FeedEvent, MessageDraft, SessionCommand, SessionEvent};
pub use error::{BackendError, FeedError, Result};
pub use feed::{
    CacheChange, FeedCache, FeedRow, FeedStore, OverflowPolicy, SendPath, SubscriptionHandle,
    SubscriptionManager,
};
pub use identity::{IdentityProvider, StaticIdentity, StoredIdentity};
pub use retry::RetryPolicy;
pub use session::ChatSession;
pub use storage::{FeedBackend, FeedDatabase};
