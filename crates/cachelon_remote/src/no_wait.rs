// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Non-blocking façade in front of a remote cache client.
//!
//! Mutations are turned into events on a [`CacheEventQueue`] and return as soon as the
//! event is queued. Reads go straight to the client. Any communication failure the
//! façade observes destroys its queue, so the façade reports [`CacheStatus::Error`]
//! until a repair installs a fresh queue.

use std::{
    fmt::{self, Debug, Display, Formatter},
    marker::PhantomData,
    sync::Arc,
};

use parking_lot::RwLock;
use tick::Clock;

use crate::{
    CacheElement, CacheEventQueue, CacheStatus, ElementAttributes, Error, ErrorNotifier, QueueOptions, RemoteCacheClient,
    Result,
};

/// Queues updates to a remote cache and reads from it directly.
///
/// # Examples
///
/// ```ignore
/// use std::sync::Arc;
/// use cachelon_remote::RemoteCacheNoWait;
///
/// let cache = RemoteCacheNoWait::builder(Arc::new(client), &clock)
///     .queue_options(QueueOptions::new().max_failure(3))
///     .notifier(monitor.notifier())
///     .build();
///
/// cache.put("alice".to_string(), 42)?;
/// let value = cache.get(&"alice".to_string()).await?;
/// ```
pub struct RemoteCacheNoWait<K, V, C> {
    client: Arc<C>,
    // Replaced wholesale on reset; readers holding an older `Arc` see it destroyed.
    queue: RwLock<Arc<CacheEventQueue<K, V>>>,
    options: QueueOptions,
    clock: Clock,
    notifier: Option<ErrorNotifier>,
}

/// Builder for [`RemoteCacheNoWait`].
///
/// Created by [`RemoteCacheNoWait::builder`].
pub struct RemoteCacheNoWaitBuilder<K, V, C> {
    client: Arc<C>,
    options: QueueOptions,
    clock: Clock,
    notifier: Option<ErrorNotifier>,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C> Debug for RemoteCacheNoWaitBuilder<K, V, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCacheNoWaitBuilder")
            .field("options", &self.options)
            .field("notifier", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}

impl<K, V, C> RemoteCacheNoWaitBuilder<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: RemoteCacheClient<K, V> + 'static,
{
    /// Sets the retry policy of the event queue.
    #[must_use]
    pub fn queue_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    /// Reports quarantines to a recovery monitor.
    #[must_use]
    pub fn notifier(mut self, notifier: ErrorNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Builds the façade and starts its event queue.
    ///
    /// A client that already reports [`CacheStatus::Error`] gets a destroyed queue, so the
    /// façade starts out in error until it is repaired.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn build(self) -> RemoteCacheNoWait<K, V, C> {
        let queue = new_queue(&self.client, self.options, &self.clock, self.notifier.as_ref());
        if self.client.status().is_error() {
            queue.destroy();
        }

        RemoteCacheNoWait {
            client: self.client,
            queue: RwLock::new(Arc::new(queue)),
            options: self.options,
            clock: self.clock,
            notifier: self.notifier,
        }
    }
}

fn new_queue<K, V, C>(client: &Arc<C>, options: QueueOptions, clock: &Clock, notifier: Option<&ErrorNotifier>) -> CacheEventQueue<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: RemoteCacheClient<K, V> + 'static,
{
    CacheEventQueue::with_notifier(
        Arc::clone(client),
        client.listener_id(),
        client.cache_name(),
        options,
        clock,
        notifier.cloned(),
    )
}

impl<K, V, C> RemoteCacheNoWait<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: RemoteCacheClient<K, V> + 'static,
{
    /// Creates a façade with the default retry policy.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new(client: Arc<C>, clock: &Clock) -> Self {
        Self::builder(client, clock).build()
    }

    /// Returns a builder for a façade in front of `client`.
    ///
    /// Event queues started by the façade measure their retry pauses with `clock`.
    #[must_use]
    pub fn builder(client: Arc<C>, clock: &Clock) -> RemoteCacheNoWaitBuilder<K, V, C> {
        RemoteCacheNoWaitBuilder {
            client,
            options: QueueOptions::default(),
            clock: clock.clone(),
            notifier: None,
            _phantom: PhantomData,
        }
    }

    /// Queues a put of `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the event queue no longer accepts events.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.update(CacheElement::new(self.client.cache_name(), key, value))
    }

    /// Queues a put of `value` under `key` with element attributes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the event queue no longer accepts events.
    pub fn put_with_attributes(&self, key: K, value: V, attributes: ElementAttributes) -> Result<()> {
        self.update(CacheElement::new(self.client.cache_name(), key, value).with_attributes(attributes))
    }

    /// Queues a put of an already built element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the event queue no longer accepts events.
    pub fn update(&self, element: CacheElement<K, V>) -> Result<()> {
        let queue = self.queue.read();
        queue.enqueue_put(element).inspect_err(|error| self.quarantine(&queue, "put", error))
    }

    /// Reads a value straight from the remote cache.
    ///
    /// A read whose payload cannot be deserialized is retried once; if the retry fails the
    /// same way the value is reported as absent.
    ///
    /// # Errors
    ///
    /// Returns the client's error for any other failure, after destroying the event queue.
    /// A failure that outlives a repair is still returned but leaves the repaired queue alone.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let queue = Arc::clone(&self.queue.read());
        let error = match self.client.get(key).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_deserialization() {
            self.quarantine_if_current(&queue, "get", &error);
            return Err(error);
        }

        tracing::debug!(cache_name = self.cache_name(), error = %error, "retrying the get after a deserialization failure");
        match self.client.get(key).await {
            Ok(value) => Ok(value),
            Err(error) if error.is_deserialization() => {
                tracing::debug!(cache_name = self.cache_name(), error = %error, "retried get failed to deserialize again");
                Ok(None)
            }
            Err(error) => {
                self.quarantine_if_current(&queue, "get", &error);
                Err(error)
            }
        }
    }

    /// Queues the removal of `key`.
    ///
    /// Always returns `false`: the removal happens asynchronously, so its outcome is not
    /// known when this call returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the event queue no longer accepts events.
    pub fn remove(&self, key: K) -> Result<bool> {
        let queue = self.queue.read();
        queue
            .enqueue_remove(key)
            .inspect_err(|error| self.quarantine(&queue, "remove", error))
            .map(|()| false)
    }

    /// Queues the removal of every key of the region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the event queue no longer accepts events.
    pub fn remove_all(&self) -> Result<()> {
        let queue = self.queue.read();
        queue
            .enqueue_remove_all()
            .inspect_err(|error| self.quarantine(&queue, "remove_all", error))
    }

    /// Queues the release of the region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueDestroyed`] if the event queue no longer accepts events.
    pub fn dispose(&self) -> Result<()> {
        let queue = self.queue.read();
        queue
            .enqueue_dispose()
            .inspect_err(|error| self.quarantine(&queue, "dispose", error))
    }

    /// Replaces the client's connection and starts a fresh event queue.
    pub fn fix_cache(&self, handle: C::Handle) {
        self.client.replace_handle(handle);
        self.reset_event_queue();
    }

    /// Destroys the current event queue, if still alive, and starts a new one.
    ///
    /// The new queue delivers to the same listener and region with a clean failure budget.
    pub fn reset_event_queue(&self) {
        let mut queue = self.queue.write();
        if queue.is_alive() {
            queue.destroy();
        }
        *queue = Arc::new(new_queue(&self.client, self.options, &self.clock, self.notifier.as_ref()));
        tracing::info!(cache_name = self.cache_name(), "event queue reset");
    }
}

impl<K, V, C> RemoteCacheNoWait<K, V, C>
where
    C: RemoteCacheClient<K, V>,
{
    /// Returns the façade's health without contacting the remote side.
    ///
    /// The status is [`CacheStatus::Error`] if the event queue has been destroyed,
    /// otherwise whatever the client reports.
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        if self.queue.read().is_alive() {
            self.client.status()
        } else {
            CacheStatus::Error
        }
    }

    /// Returns the client's last known entry count.
    #[must_use]
    pub fn size(&self) -> usize {
        self.client.size()
    }

    /// Returns the client's statistics summary.
    #[must_use]
    pub fn stats(&self) -> String {
        self.client.stats()
    }

    /// Returns the region this façade serves.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        self.client.cache_name()
    }

    /// Returns the wrapped client.
    #[must_use]
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Returns `true` if the current event queue accepts events.
    #[must_use]
    pub fn is_queue_alive(&self) -> bool {
        self.queue.read().is_alive()
    }

    /// Returns the consecutive delivery failures of the current event queue.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.queue.read().failure_count()
    }

    // Callers hold the read guard, so `queue` cannot be swapped out underneath.
    fn quarantine(&self, queue: &CacheEventQueue<K, V>, operation: &'static str, error: &Error) {
        tracing::error!(cache_name = self.cache_name(), operation, error = %error, "remote cache operation failed");
        queue.destroy();
        if let Some(notifier) = &self.notifier {
            notifier.notify_error();
        }
    }

    fn quarantine_if_current(&self, failed: &Arc<CacheEventQueue<K, V>>, operation: &'static str, error: &Error) {
        let queue = self.queue.read();
        if Arc::ptr_eq(&queue, failed) {
            self.quarantine(&queue, operation, error);
        } else {
            tracing::debug!(
                cache_name = self.cache_name(),
                operation,
                error = %error,
                "ignoring a failure from before the event queue was reset"
            );
        }
    }
}

impl<K, V, C> Debug for RemoteCacheNoWait<K, V, C>
where
    C: RemoteCacheClient<K, V>,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCacheNoWait")
            .field("cache_name", &self.cache_name())
            .field("queue", &**self.queue.read())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<K, V, C> Display for RemoteCacheNoWait<K, V, C>
where
    C: RemoteCacheClient<K, V>,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteCacheNoWait: {}", self.cache_name())
    }
}
