// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The remote cache client seam and the health it reports.

use std::fmt::{self, Display, Formatter};

use crate::{CacheListener, Error, ListenerId};

/// Health of a remote cache or of a façade in front of it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// The cache accepts operations.
    #[default]
    Active,
    /// The connection is broken or the event queue has been destroyed.
    Error,
}

impl CacheStatus {
    /// Returns `true` for [`CacheStatus::Error`].
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

impl Display for CacheStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Error => "error",
        })
    }
}

/// A synchronous client of the remote cache service for one region.
///
/// The client is also the listener its façade's event queue delivers to. Implementations
/// own the transport: every call may be slow and may fail. The status, size and statistics
/// accessors must answer from locally cached values without contacting the remote side.
pub trait RemoteCacheClient<K, V>: CacheListener<K, V> {
    /// A live connection to the remote service, handed over by a repair.
    type Handle: Send;

    /// Reads one value from the remote service.
    ///
    /// Return [`Error::Deserialization`] when the payload could not be reconstructed
    /// and [`Error::Communication`] when the service could not be reached.
    fn get(&self, key: &K) -> impl Future<Output = Result<Option<V>, Error>> + Send;

    /// Returns the region this client serves.
    fn cache_name(&self) -> &str;

    /// Returns the last known status of the connection.
    fn status(&self) -> CacheStatus;

    /// Returns the last known number of entries.
    fn size(&self) -> usize;

    /// Returns a human-readable statistics summary.
    fn stats(&self) -> String;

    /// Replaces the connection this client talks through.
    fn replace_handle(&self, handle: Self::Handle);

    /// Returns the identifier the remote service assigned to this client.
    fn listener_id(&self) -> ListenerId {
        ListenerId::UNASSIGNED
    }
}
