// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Connection groups scanned and repaired by the recovery monitor.
//!
//! A connection group is the set of façades sharing one physical connection to a
//! remote cache service. When one of them is in error, the whole group is assumed
//! broken and is restored at once.

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use parking_lot::RwLock;

use crate::{CacheStatus, Error, RemoteCacheClient, RemoteCacheNoWait, Result};

/// Enumerates the connection groups known to the process.
pub trait ConnectionRegistry: Send + Sync {
    /// The connection group type.
    type Group: ConnectionGroup;

    /// Returns a snapshot of the registered groups.
    fn groups(&self) -> Vec<Arc<Self::Group>>;
}

/// Façades that share one remote connection.
pub trait ConnectionGroup: Send + Sync {
    /// The repair attempt type.
    type Restore: CacheRestore;

    /// Returns a name for logs, usually the remote address.
    fn name(&self) -> &str;

    /// Returns the current status of every façade in the group.
    fn statuses(&self) -> Vec<CacheStatus>;

    /// Starts a repair attempt for the group.
    fn restore(&self) -> Self::Restore;
}

/// A single attempt at restoring a connection group.
pub trait CacheRestore: Send {
    /// Checks whether the remote side is reachable again.
    fn can_repair(&mut self) -> impl Future<Output = bool> + Send;

    /// Restores every façade of the group.
    ///
    /// Repairing a group that is already healthy must be harmless.
    fn repair(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// A registry whose groups are added and removed at runtime.
///
/// # Examples
///
/// ```ignore
/// let registry = Arc::new(GroupRegistry::new());
/// registry.register(Arc::new(RemoteCacheGroup::new("cache-host:1102", connector)));
/// let monitor = RemoteCacheMonitor::new(Arc::clone(&registry), &clock, MonitorOptions::default());
/// ```
pub struct GroupRegistry<G> {
    groups: RwLock<Vec<Arc<G>>>,
}

impl<G> Default for GroupRegistry<G> {
    fn default() -> Self {
        Self {
            groups: RwLock::new(Vec::new()),
        }
    }
}

impl<G> Debug for GroupRegistry<G> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.groups.read().len())
            .finish()
    }
}

impl<G> GroupRegistry<G> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group.
    pub fn register(&self, group: Arc<G>) {
        self.groups.write().push(group);
    }

    /// Removes a group, returning `true` if it was registered.
    pub fn unregister(&self, group: &Arc<G>) -> bool {
        let mut groups = self.groups.write();
        let before = groups.len();
        groups.retain(|registered| !Arc::ptr_eq(registered, group));
        groups.len() != before
    }

    /// Returns the number of registered groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Returns `true` if no group is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}

impl<G: ConnectionGroup> ConnectionRegistry for GroupRegistry<G> {
    type Group = G;

    fn groups(&self) -> Vec<Arc<G>> {
        self.groups.read().clone()
    }
}

/// Opens fresh connections to a remote cache service.
pub trait Connector: Send + Sync {
    /// The connection type handed to clients.
    type Handle: Clone + Send + Sync;

    /// Connects to the remote service.
    fn connect(&self) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// The façades of every region served through one remote connection.
pub struct RemoteCacheGroup<K, V, C, N> {
    name: String,
    connector: Arc<N>,
    caches: RwLock<Vec<Arc<RemoteCacheNoWait<K, V, C>>>>,
}

impl<K, V, C, N> Debug for RemoteCacheGroup<K, V, C, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCacheGroup")
            .field("name", &self.name)
            .field("caches", &self.caches.read().len())
            .finish_non_exhaustive()
    }
}

impl<K, V, C, N> RemoteCacheGroup<K, V, C, N> {
    /// Creates an empty group reconnecting through `connector`.
    pub fn new(name: impl Into<String>, connector: Arc<N>) -> Self {
        Self {
            name: name.into(),
            connector,
            caches: RwLock::new(Vec::new()),
        }
    }

    /// Adds a façade to the group.
    pub fn add(&self, cache: Arc<RemoteCacheNoWait<K, V, C>>) {
        self.caches.write().push(cache);
    }

    /// Returns the façades of the group.
    #[must_use]
    pub fn caches(&self) -> Vec<Arc<RemoteCacheNoWait<K, V, C>>> {
        self.caches.read().clone()
    }
}

impl<K, V, C, N> ConnectionGroup for RemoteCacheGroup<K, V, C, N>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: RemoteCacheClient<K, V, Handle = N::Handle> + 'static,
    N: Connector + 'static,
{
    type Restore = GroupRestore<K, V, C, N>;

    fn name(&self) -> &str {
        &self.name
    }

    fn statuses(&self) -> Vec<CacheStatus> {
        self.caches.read().iter().map(|cache| cache.status()).collect()
    }

    fn restore(&self) -> Self::Restore {
        GroupRestore {
            name: self.name.clone(),
            connector: Arc::clone(&self.connector),
            caches: self.caches(),
            handle: None,
        }
    }
}

/// Restores a [`RemoteCacheGroup`] by reconnecting and fixing every façade.
///
/// [`can_repair`](CacheRestore::can_repair) opens the new connection;
/// [`repair`](CacheRestore::repair) installs it.
pub struct GroupRestore<K, V, C, N: Connector> {
    name: String,
    connector: Arc<N>,
    caches: Vec<Arc<RemoteCacheNoWait<K, V, C>>>,
    handle: Option<N::Handle>,
}

impl<K, V, C, N: Connector> Debug for GroupRestore<K, V, C, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRestore")
            .field("name", &self.name)
            .field("caches", &self.caches.len())
            .field("connected", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl<K, V, C, N> CacheRestore for GroupRestore<K, V, C, N>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: RemoteCacheClient<K, V, Handle = N::Handle> + 'static,
    N: Connector + 'static,
{
    async fn can_repair(&mut self) -> bool {
        if self.handle.is_some() {
            return true;
        }

        match self.connector.connect().await {
            Ok(handle) => {
                self.handle = Some(handle);
                true
            }
            Err(error) => {
                tracing::warn!(group = %self.name, error = %error, "remote cache service still unreachable");
                false
            }
        }
    }

    async fn repair(&mut self) -> Result<()> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::repair(self.name.clone(), "no connection to install, call can_repair first"))?;

        for cache in &self.caches {
            cache.fix_cache(handle.clone());
        }

        tracing::info!(group = %self.name, caches = self.caches.len(), "connection group restored");
        Ok(())
    }
}
