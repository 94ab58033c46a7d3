pub mod cache;
pub mod send;
pub mod store;
pub mod subscription;

pub use cache::{CacheChange, FeedCache, FeedRow};
pub use send::{SendPath, compose};
pub use store::FeedStore;
pub use subscription::{OverflowPolicy, SubscriptionHandle, SubscriptionId, SubscriptionManager};
