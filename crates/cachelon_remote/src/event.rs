// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache events and the listener capability they are delivered to.

use std::fmt::{self, Display, Formatter};

use crate::{CacheElement, Error};

/// Identifies the listener an event queue delivers to.
///
/// Remote cache servers hand out one identifier per connected client so that
/// a client's own updates are not echoed back to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u8);

impl ListenerId {
    /// The identifier used before a server has assigned one.
    pub const UNASSIGNED: Self = Self(0);
}

impl Display for ListenerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives the cache mutations propagated by an event queue.
///
/// Each operation may fail. Return [`Error::Communication`] for conditions that a retry
/// might fix (a dropped connection, a timeout) and [`Error::Fatal`] when the listener is
/// permanently unusable.
///
/// # Examples
///
/// ```
/// use cachelon_remote::{CacheElement, CacheListener, Error};
///
/// struct Discard;
///
/// impl CacheListener<String, i32> for Discard {
///     async fn handle_put(&self, _element: &CacheElement<String, i32>) -> Result<(), Error> {
///         Ok(())
///     }
///
///     async fn handle_remove(&self, _cache_name: &str, _key: &String) -> Result<(), Error> {
///         Ok(())
///     }
///
///     async fn handle_remove_all(&self, _cache_name: &str) -> Result<(), Error> {
///         Ok(())
///     }
///
///     async fn handle_dispose(&self, _cache_name: &str) -> Result<(), Error> {
///         Ok(())
///     }
/// }
/// ```
pub trait CacheListener<K, V>: Send + Sync {
    /// Stores an element.
    fn handle_put(&self, element: &CacheElement<K, V>) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes one key from the named region.
    fn handle_remove(&self, cache_name: &str, key: &K) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes every key from the named region.
    fn handle_remove_all(&self, cache_name: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Releases the named region.
    fn handle_dispose(&self, cache_name: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

/// An ordered instruction queued for a listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheEvent<K, V> {
    /// Store an element.
    Put(CacheElement<K, V>),
    /// Remove one key.
    Remove(K),
    /// Remove every key of the region.
    RemoveAll,
    /// Release the region.
    Dispose,
}

impl<K, V> CacheEvent<K, V> {
    /// Returns a short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put(_) => "put",
            Self::Remove(_) => "remove",
            Self::RemoveAll => "remove_all",
            Self::Dispose => "dispose",
        }
    }

    pub(crate) async fn deliver<L>(&self, listener: &L, cache_name: &str) -> Result<(), Error>
    where
        L: CacheListener<K, V> + ?Sized,
    {
        match self {
            Self::Put(element) => listener.handle_put(element).await,
            Self::Remove(key) => listener.handle_remove(cache_name, key).await,
            Self::RemoveAll => listener.handle_remove_all(cache_name).await,
            Self::Dispose => listener.handle_dispose(cache_name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use recoverable::{Recovery, RecoveryKind};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl CacheListener<u32, &'static str> for Recorder {
        async fn handle_put(&self, element: &CacheElement<u32, &'static str>) -> Result<(), Error> {
            self.calls
                .lock()
                .push(format!("put {}:{}={}", element.cache_name(), element.key(), element.value()));
            Ok(())
        }

        async fn handle_remove(&self, cache_name: &str, key: &u32) -> Result<(), Error> {
            self.calls.lock().push(format!("remove {cache_name}:{key}"));
            Ok(())
        }

        async fn handle_remove_all(&self, cache_name: &str) -> Result<(), Error> {
            self.calls.lock().push(format!("remove_all {cache_name}"));
            Ok(())
        }

        async fn handle_dispose(&self, cache_name: &str) -> Result<(), Error> {
            Err(Error::fatal(format!("{cache_name} already disposed")))
        }
    }

    #[tokio::test]
    async fn deliver_dispatches_by_variant() {
        let recorder = Recorder::default();

        CacheEvent::Put(CacheElement::new("r", 1, "one")).deliver(&recorder, "r").await.unwrap();
        CacheEvent::<u32, &str>::Remove(1).deliver(&recorder, "r").await.unwrap();
        CacheEvent::<u32, &str>::RemoveAll.deliver(&recorder, "r").await.unwrap();
        let dispose = CacheEvent::<u32, &str>::Dispose.deliver(&recorder, "r").await;

        assert_eq!(*recorder.calls.lock(), vec!["put r:1=one", "remove r:1", "remove_all r"]);
        assert_eq!(dispose.unwrap_err().recovery().kind(), RecoveryKind::Never);
    }

    #[test]
    fn kind_names() {
        assert_eq!(CacheEvent::Put(CacheElement::new("r", 1, 2)).kind(), "put");
        assert_eq!(CacheEvent::<u32, u32>::Remove(1).kind(), "remove");
        assert_eq!(CacheEvent::<u32, u32>::RemoveAll.kind(), "remove_all");
        assert_eq!(CacheEvent::<u32, u32>::Dispose.kind(), "dispose");
    }

    #[test]
    fn listener_id_display() {
        assert_eq!(ListenerId(17).to_string(), "17");
        assert_eq!(ListenerId::default(), ListenerId::UNASSIGNED);
    }
}
