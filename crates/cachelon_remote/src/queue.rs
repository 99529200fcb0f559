// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ordered, single-consumer propagation of cache events to one listener.
//!
//! A [`CacheEventQueue`] accepts events from any number of producers and hands them
//! to its listener strictly in enqueue order from one background task. A failing
//! delivery is retried in place, which holds back every later event of the same
//! queue. Once the queue-wide failure budget is spent the queue destroys itself
//! and drops the event rather than deliver anything out of order.

use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use parking_lot::Mutex;
use recoverable::{Recovery, RecoveryKind};
use tick::Clock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{CacheElement, CacheEvent, CacheListener, Error, ErrorNotifier, ListenerId, QueueOptions, Result};

type EventSender<K, V> = mpsc::UnboundedSender<CacheEvent<K, V>>;

/// Delivers cache events to exactly one listener, in order, with bounded retry.
///
/// The queue starts its consumer task on construction and stays alive until
/// [`destroy`](Self::destroy) is called, its retry budget runs out, or the queue is
/// dropped. A destroyed queue never comes back; build a new one to resume propagation.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use cachelon_remote::{CacheElement, CacheEventQueue, CacheListener, Error, ListenerId, QueueOptions};
/// use tick::Clock;
///
/// struct Discard;
///
/// impl CacheListener<String, i32> for Discard {
///     async fn handle_put(&self, _: &CacheElement<String, i32>) -> Result<(), Error> { Ok(()) }
///     async fn handle_remove(&self, _: &str, _: &String) -> Result<(), Error> { Ok(()) }
///     async fn handle_remove_all(&self, _: &str) -> Result<(), Error> { Ok(()) }
///     async fn handle_dispose(&self, _: &str) -> Result<(), Error> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Error> {
/// let clock = Clock::new_frozen();
/// let queue = CacheEventQueue::new(Arc::new(Discard), ListenerId(1), "users", QueueOptions::default(), &clock);
/// queue.enqueue_put(CacheElement::new("users", "alice".to_string(), 42))?;
///
/// queue.destroy();
/// assert!(!queue.is_alive());
/// assert!(queue.enqueue_remove_all().is_err());
/// # Ok(())
/// # }
/// ```
pub struct CacheEventQueue<K, V> {
    shared: Arc<QueueShared<K, V>>,
}

struct QueueShared<K, V> {
    listener_id: ListenerId,
    cache_name: Arc<str>,
    options: QueueOptions,
    failure_count: AtomicU32,
    clock: Clock,
    // `None` once destroyed. Every state transition happens under this lock.
    sender: Mutex<Option<EventSender<K, V>>>,
    cancel: CancellationToken,
    notifier: Option<ErrorNotifier>,
}

impl<K, V> CacheEventQueue<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a queue and starts its consumer task.
    ///
    /// Retry pauses are measured with `clock`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new<L>(listener: Arc<L>, listener_id: ListenerId, cache_name: impl Into<Arc<str>>, options: QueueOptions, clock: &Clock) -> Self
    where
        L: CacheListener<K, V> + 'static,
    {
        Self::with_notifier(listener, listener_id, cache_name, options, clock, None)
    }

    /// Creates a queue that reports its own destruction to a recovery monitor.
    ///
    /// The notifier fires when the queue gives up on its listener, not when it is
    /// destroyed on request.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn with_notifier<L>(
        listener: Arc<L>,
        listener_id: ListenerId,
        cache_name: impl Into<Arc<str>>,
        options: QueueOptions,
        clock: &Clock,
        notifier: Option<ErrorNotifier>,
    ) -> Self
    where
        L: CacheListener<K, V> + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            listener_id,
            cache_name: cache_name.into(),
            options: options.normalized(),
            failure_count: AtomicU32::new(0),
            clock: clock.clone(),
            sender: Mutex::new(Some(sender)),
            cancel: CancellationToken::new(),
            notifier,
        });

        tokio::spawn(consume(receiver, listener, Arc::clone(&shared)));
        tracing::debug!(listener_id = %listener_id, cache_name = %shared.cache_name, "event queue constructed");

        Self { shared }
    }
}

impl<K, V> CacheEventQueue<K, V> {
    /// Queues a put of the given element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the queue no longer accepts events.
    pub fn enqueue_put(&self, element: CacheElement<K, V>) -> Result<()> {
        self.shared.enqueue(CacheEvent::Put(element))
    }

    /// Queues the removal of one key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the queue no longer accepts events.
    pub fn enqueue_remove(&self, key: K) -> Result<()> {
        self.shared.enqueue(CacheEvent::Remove(key))
    }

    /// Queues the removal of every key of the region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the queue no longer accepts events.
    pub fn enqueue_remove_all(&self) -> Result<()> {
        self.shared.enqueue(CacheEvent::RemoveAll)
    }

    /// Queues the release of the region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the queue no longer accepts events.
    pub fn enqueue_dispose(&self) -> Result<()> {
        self.shared.enqueue(CacheEvent::Dispose)
    }

    /// Returns `true` until the queue is destroyed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.shared.cancel.is_cancelled()
    }

    /// Destroys the queue, stopping its consumer and releasing the listener.
    ///
    /// Events still waiting in the queue are dropped. Returns `true` if this call
    /// performed the transition and `false` if the queue was already destroyed.
    pub fn destroy(&self) -> bool {
        self.shared.destroy()
    }

    /// Returns the identifier of the listener this queue delivers to.
    #[must_use]
    pub fn listener_id(&self) -> ListenerId {
        self.shared.listener_id
    }

    /// Returns the region this queue propagates.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.shared.cache_name
    }

    /// Returns the number of consecutive failed deliveries.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.shared.failure_count.load(Ordering::Acquire)
    }

    /// Returns the retry policy in effect.
    #[must_use]
    pub fn options(&self) -> QueueOptions {
        self.shared.options
    }
}

impl<K, V> Drop for CacheEventQueue<K, V> {
    fn drop(&mut self) {
        self.shared.destroy();
    }
}

impl<K, V> Debug for CacheEventQueue<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEventQueue")
            .field("listener_id", &self.shared.listener_id)
            .field("cache_name", &self.shared.cache_name)
            .field("alive", &self.is_alive())
            .field("failure_count", &self.failure_count())
            .finish_non_exhaustive()
    }
}

impl<K, V> Display for CacheEventQueue<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.shared, f)
    }
}

impl<K, V> Display for QueueShared<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "listener_id={}, cache_name={}", self.listener_id, self.cache_name)
    }
}

impl<K, V> QueueShared<K, V> {
    fn enqueue(&self, event: CacheEvent<K, V>) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or_else(|| Error::queue_destroyed(&self.cache_name))?;
        // Only fails once the consumer is gone, which implies the queue was destroyed.
        sender.send(event).map_err(|_closed| Error::queue_destroyed(&self.cache_name))
    }

    fn is_destroyed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn destroy(&self) -> bool {
        let sender = {
            let mut guard = self.sender.lock();
            let Some(sender) = guard.take() else {
                return false;
            };
            self.cancel.cancel();
            sender
        };
        drop(sender);

        tracing::info!(listener_id = %self.listener_id, cache_name = %self.cache_name, "cache event queue destroyed");
        true
    }

    /// Delivers one event, retrying retryable failures until the shared budget is spent.
    async fn deliver<L>(&self, listener: &L, event: &CacheEvent<K, V>)
    where
        L: CacheListener<K, V>,
    {
        let max_failure = self.options.get_max_failure();
        let mut last_error = None;

        while !self.is_destroyed() && self.failure_count.load(Ordering::Acquire) <= max_failure {
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                outcome = event.deliver(listener, &self.cache_name) => outcome,
            };

            let error = match outcome {
                Ok(()) => {
                    self.failure_count.store(0, Ordering::Release);
                    return;
                }
                Err(error) => error,
            };

            if error.recovery().kind() != RecoveryKind::Retry {
                tracing::error!(
                    queue = %self,
                    event = event.kind(),
                    error = %error,
                    "listener failed unexpectedly"
                );
                last_error = Some(error);
                break;
            }

            let failure_count = match self
                .failure_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| Some(count.saturating_add(1)))
            {
                Ok(previous) | Err(previous) => previous.saturating_add(1),
            };
            last_error = Some(error);
            if self.is_destroyed() || failure_count > max_failure {
                break;
            }

            tracing::warn!(queue = %self, event = event.kind(), failure_count, "retrying propagation");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                () = self.clock.delay(self.options.get_retry_delay()) => {}
            }
        }

        if let Some(error) = last_error {
            tracing::warn!(queue = %self, event = event.kind(), error = %error, "giving up propagation");
            if self.destroy()
                && let Some(notifier) = &self.notifier
            {
                notifier.notify_error();
            }
        }
    }
}

async fn consume<K, V, L>(mut receiver: mpsc::UnboundedReceiver<CacheEvent<K, V>>, listener: Arc<L>, shared: Arc<QueueShared<K, V>>)
where
    L: CacheListener<K, V>,
{
    loop {
        let event = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        shared.deliver(&*listener, &event).await;
    }

    drop(listener);
    tracing::info!(queue = %shared, "event queue consumer exiting");
}
