use std::sync::Arc;

use tokio::sync::mpsc;

use crate::common::{FeedEvent, SessionCommand, SessionEvent};
use crate::feed::{CacheChange, FeedCache, SendPath, SubscriptionHandle, SubscriptionManager};
use crate::identity::IdentityProvider;

/// One signed-in chat screen: a live subscription mirrored into a cache,
/// plus the send path, driven by commands from a render surface.
pub struct ChatSession {
    manager: Arc<SubscriptionManager>,
    send_path: SendPath,
    identity: Arc<dyn IdentityProvider>,
    cache: FeedCache,
    subscription: Option<SubscriptionHandle>,
    event_sender: mpsc::Sender<SessionEvent>,
    command_receiver: mpsc::Receiver<SessionCommand>,
}

impl ChatSession {
    pub fn new(
        manager: Arc<SubscriptionManager>,
        send_path: SendPath,
        identity: Arc<dyn IdentityProvider>,
        event_sender: mpsc::Sender<SessionEvent>,
        command_receiver: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        Self {
            manager,
            send_path,
            identity,
            cache: FeedCache::new(),
            subscription: None,
            event_sender,
            command_receiver,
        }
    }

    /// Run until quit, sign-out, or the command channel closes. Returns the
    /// final state of the cache.
    pub async fn run(mut self) -> FeedCache {
        let feed = self.send_path.feed().to_string();
        self.subscription = Some(self.manager.subscribe(&feed));
        log::info!("Chat session started on feed `{feed}`");

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                event = next_event(&mut self.subscription) => {
                    match event {
                        Some(event) => self.handle_feed_event(event).await,
                        None => {
                            log::warn!("Subscription on feed `{feed}` ended");
                            self.subscription = None;
                        }
                    }
                }
            }
        }

        if let Some(subscription) = self.subscription.take() {
            self.manager.unsubscribe(subscription).await;
        }
        log::info!("Chat session on feed `{feed}` stopped");
        self.cache
    }

    /// Returns false when the session should stop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Send(body) => {
                let outcome = self.send_path.send_detached(body);
                let events = self.event_sender.clone();
                tokio::spawn(async move {
                    let event = match outcome.await {
                        Ok(Ok(message)) => SessionEvent::MessageSent(message),
                        Ok(Err(err)) => SessionEvent::SendFailed(err.to_string()),
                        Err(_) => SessionEvent::SendFailed("send task dropped".to_string()),
                    };
                    let _ = events.send(event).await;
                });
                true
            }
            SessionCommand::Reconnect => {
                self.reconnect().await;
                true
            }
            SessionCommand::SignOut => {
                if let Some(subscription) = self.subscription.take() {
                    self.manager.unsubscribe(subscription).await;
                }
                if let Err(err) = self.identity.sign_out() {
                    log::error!("Error signing out: {err}");
                }
                self.emit(SessionEvent::SignedOut).await;
                false
            }
            SessionCommand::Quit => false,
        }
    }

    async fn reconnect(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.manager.unsubscribe(subscription).await;
        }
        let feed = self.send_path.feed();
        self.subscription = Some(match self.cache.watermark() {
            Some(watermark) => self.manager.resume(feed, watermark),
            None => self.manager.subscribe(feed),
        });
    }

    async fn handle_feed_event(&mut self, event: FeedEvent) {
        let error = match &event {
            FeedEvent::Error(error) => Some(error.message.clone()),
            _ => None,
        };

        let update = match self.cache.apply(event) {
            CacheChange::Replaced { .. } => {
                Some(SessionEvent::Replaced(self.cache.messages().to_vec()))
            }
            CacheChange::Appended => self
                .cache
                .messages()
                .last()
                .cloned()
                .map(SessionEvent::Appended),
            CacheChange::Discarded => None,
            CacheChange::Degraded => error.map(SessionEvent::Degraded),
        };

        if let Some(update) = update {
            self.emit(update).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::warn!("Failed to notify render surface: {err}");
        }
    }
}

async fn next_event(subscription: &mut Option<SubscriptionHandle>) -> Option<FeedEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
