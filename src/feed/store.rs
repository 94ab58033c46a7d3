use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};

use crate::common::{ChatMessage, MessageDraft};
use crate::error::{BackendError, Result};
use crate::storage::{Appended, FeedBackend, FeedDatabase};

pub const DEFAULT_REQUEST_CAPACITY: usize = 100;

type Reply<T> = oneshot::Sender<Result<T>>;
type TailMap = Arc<Mutex<HashMap<String, watch::Sender<u64>>>>;

enum StoreRequest {
    Append {
        feed: String,
        draft: MessageDraft,
        reply: Reply<ChatMessage>,
    },
    Snapshot {
        feed: String,
        reply: Reply<Vec<ChatMessage>>,
    },
    ReadAfter {
        feed: String,
        watermark: u64,
        reply: Reply<Vec<ChatMessage>>,
    },
    Tail {
        feed: String,
        reply: Reply<Option<u64>>,
    },
    Len {
        feed: String,
        reply: Reply<usize>,
    },
}

/// Handle to the single task that owns a feed backend.
///
/// Every operation goes through the task's queue, so appends are committed
/// one at a time and each feed has a total order. Cloning the handle is
/// cheap; the task stops once the last clone is dropped.
#[derive(Clone)]
pub struct FeedStore {
    requests: mpsc::Sender<StoreRequest>,
    tails: TailMap,
}

impl FeedStore {
    /// Start the store task on the current tokio runtime.
    pub fn spawn<B: FeedBackend>(backend: B) -> Self {
        Self::spawn_with_capacity(backend, DEFAULT_REQUEST_CAPACITY)
    }

    pub fn spawn_with_capacity<B: FeedBackend>(backend: B, capacity: usize) -> Self {
        let (requests, receiver) = mpsc::channel(capacity.max(1));
        let tails = TailMap::default();
        let worker = StoreWorker {
            backend: Box::new(backend),
            tails: Arc::clone(&tails),
        };
        tokio::spawn(worker.run(receiver));
        Self { requests, tails }
    }

    /// Open the SQLite feed at `path` and start the store task.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = FeedDatabase::open(path)?;
        Ok(Self::spawn(db))
    }

    pub fn in_memory() -> Result<Self> {
        let db = FeedDatabase::in_memory()?;
        Ok(Self::spawn(db))
    }

    /// Commit `draft` to `feed`. Returns once the message is durable.
    pub async fn append(&self, feed: &str, draft: MessageDraft) -> Result<ChatMessage> {
        draft.validate()?;
        self.request(|reply| StoreRequest::Append {
            feed: feed.to_string(),
            draft,
            reply,
        })
        .await
    }

    /// Full ordered copy of `feed`.
    pub async fn snapshot(&self, feed: &str) -> Result<Vec<ChatMessage>> {
        self.request(|reply| StoreRequest::Snapshot {
            feed: feed.to_string(),
            reply,
        })
        .await
    }

    /// Messages of `feed` committed after `watermark`, in order.
    pub async fn read_after(&self, feed: &str, watermark: u64) -> Result<Vec<ChatMessage>> {
        self.request(|reply| StoreRequest::ReadAfter {
            feed: feed.to_string(),
            watermark,
            reply,
        })
        .await
    }

    /// Commit position of the last message in `feed`.
    pub async fn tail(&self, feed: &str) -> Result<Option<u64>> {
        self.request(|reply| StoreRequest::Tail {
            feed: feed.to_string(),
            reply,
        })
        .await
    }

    pub async fn len(&self, feed: &str) -> Result<usize> {
        self.request(|reply| StoreRequest::Len {
            feed: feed.to_string(),
            reply,
        })
        .await
    }

    /// Receiver that changes every time `feed` gets a new tail.
    ///
    /// The value is the tail's `seq` as of the last append seen by this
    /// process (0 until then), not a read of the backend.
    pub fn watch_tail(&self, feed: &str) -> watch::Receiver<u64> {
        let mut tails = self.tails.lock().unwrap_or_else(PoisonError::into_inner);
        tails
            .entry(feed.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> StoreRequest) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| BackendError::Closed)?;
        response.await.map_err(|_| BackendError::Closed)?
    }
}

struct StoreWorker {
    backend: Box<dyn FeedBackend>,
    tails: TailMap,
}

impl StoreWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<StoreRequest>) {
        log::debug!("Feed store task started");
        while let Some(request) = receiver.recv().await {
            self.handle(request);
        }
        log::debug!("Feed store task stopped");
    }

    fn handle(&mut self, request: StoreRequest) {
        // A dropped reply receiver means the caller gave up; nothing to do.
        match request {
            StoreRequest::Append { feed, draft, reply } => {
                let _ = reply.send(self.append(&feed, draft));
            }
            StoreRequest::Snapshot { feed, reply } => {
                let _ = reply.send(self.backend.read_all(&feed).map_err(Into::into));
            }
            StoreRequest::ReadAfter {
                feed,
                watermark,
                reply,
            } => {
                let _ = reply.send(
                    self.backend
                        .read_after(&feed, watermark)
                        .map_err(Into::into),
                );
            }
            StoreRequest::Tail { feed, reply } => {
                let tail = self
                    .backend
                    .tail(&feed)
                    .map(|tail| tail.map(|message| message.seq));
                let _ = reply.send(tail.map_err(Into::into));
            }
            StoreRequest::Len { feed, reply } => {
                let _ = reply.send(self.backend.len(&feed).map_err(Into::into));
            }
        }
    }

    fn append(&mut self, feed: &str, mut draft: MessageDraft) -> Result<ChatMessage> {
        draft.validate()?;

        // Commit order and sort order must agree: never let a late clock
        // place a message before the current tail.
        if let Some(tail) = self.backend.tail(feed)? {
            if draft.sent_at < tail.sent_at {
                log::debug!(
                    "Clamping sent_at of {} from {} to tail {}",
                    draft.id,
                    draft.sent_at,
                    tail.sent_at
                );
                draft.sent_at = tail.sent_at;
            }
        }

        match self.backend.append(feed, &draft)? {
            Appended::Committed(message) => {
                log::debug!("Committed #{} to feed `{feed}`", message.seq);
                self.notify_tail(feed, message.seq);
                Ok(message)
            }
            Appended::Existing(message) => {
                log::debug!("Draft {} already committed as #{}", message.id, message.seq);
                Ok(message)
            }
        }
    }

    fn notify_tail(&self, feed: &str, seq: u64) {
        let mut tails = self.tails.lock().unwrap_or_else(PoisonError::into_inner);
        match tails.get(feed) {
            Some(sender) => {
                sender.send_replace(seq);
            }
            None => {
                tails.insert(feed.to_string(), watch::channel(seq).0);
            }
        }
    }
}
