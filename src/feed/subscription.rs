use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::FeedStore;
use crate::common::{ErrorEvent, FeedEvent};
use crate::error::FeedError;
use crate::retry::RetryPolicy;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// How often a subscription rereads its feed for commits made through
/// another store (another process on the same database file).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

pub type SubscriptionId = u64;

type Registry = Arc<Mutex<HashMap<SubscriptionId, Arc<watch::Sender<bool>>>>>;

/// What a subscription does when its observer stops draining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the undelivered backlog and send a fresh snapshot once the
    /// observer has room again.
    #[default]
    Resync,
    /// Wait for room. Only this subscription stalls.
    Wait,
}

/// Opens and tracks live subscriptions on the feeds of one store.
pub struct SubscriptionManager {
    store: FeedStore,
    capacity: usize,
    policy: OverflowPolicy,
    retry: RetryPolicy,
    poll_interval: Duration,
    next_id: AtomicU64,
    registry: Registry,
}

impl SubscriptionManager {
    pub fn new(store: FeedStore) -> Self {
        Self {
            store,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            policy: OverflowPolicy::default(),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            next_id: AtomicU64::new(1),
            registry: Registry::default(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    /// Subscribe to `feed`. The first event is a full snapshot, followed by
    /// every later append in commit order.
    pub fn subscribe(&self, feed: &str) -> SubscriptionHandle {
        self.start(feed, None)
    }

    /// Reconnect to `feed` without a snapshot, starting with every message
    /// committed after `watermark`.
    pub fn resume(&self, feed: &str, watermark: u64) -> SubscriptionHandle {
        self.start(feed, Some(watermark))
    }

    /// Stop delivery to `handle` and wait for its worker to exit.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        handle.close().await;
    }

    /// Stop delivery to the subscription with `id`. Unknown ids are ignored.
    pub fn unsubscribe_id(&self, id: SubscriptionId) -> bool {
        let cancel = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match cancel {
            Some(cancel) => {
                cancel.send_replace(true);
                log::info!("Subscription {id} cancelled");
                true
            }
            None => false,
        }
    }

    /// Number of subscriptions still delivering.
    pub fn active(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancel every live subscription.
    pub fn shutdown(&self) {
        let cancelled: Vec<_> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, cancel) in &cancelled {
            cancel.send_replace(true);
        }
        log::info!("Cancelled {} subscription(s)", cancelled.len());
    }

    fn start(&self, feed: &str, resume_from: Option<u64>) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::channel(self.capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);

        // Watch before the first read so nothing committed in between is missed.
        let tail = self.store.watch_tail(feed);
        let worker = SubscriptionWorker {
            id,
            feed: feed.to_string(),
            store: self.store.clone(),
            events: events_tx,
            cancel: cancel_rx,
            policy: self.policy,
            retry: self.retry,
            poll_interval: self.poll_interval,
            watermark: resume_from.unwrap_or(0),
        };

        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&cancel));
        let task = tokio::spawn(worker.run(resume_from.is_none(), tail));

        match resume_from {
            Some(watermark) => {
                log::info!("Subscription {id} resumed on feed `{feed}` after #{watermark}")
            }
            None => log::info!("Subscription {id} opened on feed `{feed}`"),
        }

        SubscriptionHandle {
            id,
            feed: feed.to_string(),
            events: events_rx,
            cancel,
            task: Some(task),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receiving end of one subscription.
///
/// Events are read with [`recv`](Self::recv) or as a [`Stream`]. Once the
/// subscription is cancelled no further event is returned, even if some were
/// already queued. Dropping the handle cancels it.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    feed: String,
    events: mpsc::Receiver<FeedEvent>,
    cancel: Arc<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    registry: Registry,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub async fn recv(&mut self) -> Option<FeedEvent> {
        if self.is_cancelled() {
            return None;
        }
        let event = self.events.recv().await?;
        // Cancellation may have landed while we were waiting.
        if self.is_cancelled() { None } else { Some(event) }
    }

    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        if self.is_cancelled() {
            return None;
        }
        self.events.try_recv().ok()
    }

    /// Cancel delivery and wait for the worker to exit.
    pub async fn close(mut self) {
        self.cancel_now();
        self.events.close();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::warn!("Subscription {} worker failed: {err}", self.id);
            }
        }
        log::info!("Subscription {} closed", self.id);
    }

    fn cancel_now(&self) {
        self.cancel.send_replace(true);
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl Stream for SubscriptionHandle {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedEvent>> {
        if self.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

enum Delivery {
    Delivered,
    /// The queue was full under [`OverflowPolicy::Resync`].
    Overflowed,
    Stopped,
}

struct SubscriptionWorker {
    id: SubscriptionId,
    feed: String,
    store: FeedStore,
    events: mpsc::Sender<FeedEvent>,
    cancel: watch::Receiver<bool>,
    policy: OverflowPolicy,
    retry: RetryPolicy,
    poll_interval: Duration,
    /// Last `seq` handed to the observer.
    watermark: u64,
}

impl SubscriptionWorker {
    async fn run(mut self, snapshot_first: bool, mut tail: watch::Receiver<u64>) {
        let mut needs_snapshot = snapshot_first;
        let mut failures = 0u32;
        // Local commits arrive through `tail`, foreign ones only show up on a reread.
        let mut poll = tokio::time::interval_at(
            tokio::time::Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.cancel.borrow() {
                break;
            }
            tail.borrow_and_update();

            let outcome = if needs_snapshot {
                self.deliver_snapshot().await
            } else {
                self.deliver_backlog().await
            };

            match outcome {
                Ok(Delivery::Delivered) => {
                    needs_snapshot = false;
                    failures = 0;
                }
                Ok(Delivery::Overflowed) => {
                    log::debug!(
                        "Subscription {} overflowed at #{}; resyncing",
                        self.id,
                        self.watermark
                    );
                    needs_snapshot = true;
                    continue;
                }
                Ok(Delivery::Stopped) => break,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    self.report(&err, failures);
                    if !self.pause(self.retry.delay_for(failures)).await {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = self.cancel.changed() => break,
                _ = self.events.closed() => break,
                changed = tail.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = poll.tick() => {}
            }
        }

        log::debug!("Subscription {} worker stopped at #{}", self.id, self.watermark);
    }

    async fn deliver_snapshot(&mut self) -> Result<Delivery, FeedError> {
        // Wait for room first so the snapshot is as fresh as possible.
        let permit = tokio::select! {
            _ = self.cancel.changed() => return Ok(Delivery::Stopped),
            permit = self.events.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return Ok(Delivery::Stopped),
            },
        };

        let messages = self.store.snapshot(&self.feed).await?;
        if let Some(last) = messages.last() {
            self.watermark = self.watermark.max(last.seq);
        }
        log::debug!(
            "Subscription {} snapshot of {} message(s)",
            self.id,
            messages.len()
        );
        permit.send(FeedEvent::FullSnapshot {
            feed: self.feed.clone(),
            messages,
        });
        Ok(Delivery::Delivered)
    }

    async fn deliver_backlog(&mut self) -> Result<Delivery, FeedError> {
        let backlog = self.store.read_after(&self.feed, self.watermark).await?;

        for message in backlog {
            let seq = message.seq;
            let event = FeedEvent::IncrementalAppend(message);
            match self.policy {
                OverflowPolicy::Wait => {
                    let sent = tokio::select! {
                        _ = self.cancel.changed() => false,
                        sent = self.events.send(event) => sent.is_ok(),
                    };
                    if !sent {
                        return Ok(Delivery::Stopped);
                    }
                }
                OverflowPolicy::Resync => match self.events.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => return Ok(Delivery::Overflowed),
                    Err(TrySendError::Closed(_)) => return Ok(Delivery::Stopped),
                },
            }
            self.watermark = seq;
        }

        Ok(Delivery::Delivered)
    }

    fn report(&self, err: &FeedError, attempt: u32) {
        log::warn!(
            "Subscription {} on feed `{}` failed (attempt {attempt}): {err}",
            self.id,
            self.feed
        );
        let event = FeedEvent::Error(ErrorEvent {
            feed: self.feed.clone(),
            message: err.to_string(),
            attempt,
            at: Utc::now(),
        });
        // Never block on an error report; the retry will produce another.
        if self.events.try_send(event).is_err() {
            log::debug!("Subscription {} dropped an error report", self.id);
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.changed() => false,
            _ = self.events.closed() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
