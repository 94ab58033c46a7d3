use std::sync::Arc;

use tokio::sync::oneshot;

use super::store::FeedStore;
use crate::common::{ChatMessage, MessageDraft};
use crate::error::{FeedError, Result};
use crate::identity::IdentityProvider;
use crate::retry::RetryPolicy;

/// Build a draft for `body` on behalf of `identity`.
///
/// Fails with [`FeedError::Auth`] when nobody is signed in and with
/// [`FeedError::Validation`] when the sender or body is blank.
pub fn compose(identity: Option<&str>, body: &str) -> Result<MessageDraft> {
    let sender = identity.ok_or(FeedError::Auth("no signed-in identity"))?;
    let draft = MessageDraft::new(sender, body);
    draft.validate()?;
    Ok(draft)
}

/// Validates user input and appends it to a feed.
#[derive(Clone)]
pub struct SendPath {
    store: FeedStore,
    identity: Arc<dyn IdentityProvider>,
    feed: String,
    retry: RetryPolicy,
}

impl SendPath {
    pub fn new(store: FeedStore, identity: Arc<dyn IdentityProvider>, feed: impl Into<String>) -> Self {
        Self {
            store,
            identity,
            feed: feed.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    /// Send `body` as the currently signed-in identity.
    pub async fn send(&self, body: &str) -> Result<ChatMessage> {
        let identity = self.identity.current_identity();
        self.send_as(identity.as_deref(), body).await
    }

    /// Send `body` as `identity`. Nothing is written unless both are valid.
    pub async fn send_as(&self, identity: Option<&str>, body: &str) -> Result<ChatMessage> {
        let draft = compose(identity, body)?;

        // Retries reuse the draft id, so a lost acknowledgement cannot
        // produce a second copy.
        let message = self
            .retry
            .run("append", || self.store.append(&self.feed, draft.clone()))
            .await?;
        log::info!(
            "Message #{} from {} saved to feed `{}`",
            message.seq,
            message.sender,
            self.feed
        );
        Ok(message)
    }

    /// Send the contents of an input buffer, clearing it on success only.
    pub async fn submit(&self, buffer: &mut String) -> Result<ChatMessage> {
        let message = self.send(buffer).await?;
        buffer.clear();
        Ok(message)
    }

    /// Send in the background. The receiver resolves with the outcome.
    pub fn send_detached(&self, body: impl Into<String>) -> oneshot::Receiver<Result<ChatMessage>> {
        let (reply, outcome) = oneshot::channel();
        let path = self.clone();
        let body = body.into();
        tokio::spawn(async move {
            let result = path.send(&body).await;
            if let Err(err) = &result {
                log::warn!("There was an issue saving the message: {err}");
            }
            let _ = reply.send(result);
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_checks_identity_before_fields() {
        assert!(matches!(compose(None, "hi"), Err(FeedError::Auth(_))));
        assert!(matches!(compose(None, ""), Err(FeedError::Auth(_))));
        assert!(matches!(
            compose(Some(""), "hi"),
            Err(FeedError::Validation { field: "sender" })
        ));
        assert!(matches!(
            compose(Some("alice@x.com"), ""),
            Err(FeedError::Validation { field: "body" })
        ));

        let draft = compose(Some("alice@x.com"), "hi").unwrap();
        assert_eq!(draft.sender, "alice@x.com");
        assert_eq!(draft.body, "hi");
    }
}
