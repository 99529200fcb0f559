// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for remote cache propagation.

use recoverable::{Recovery, RecoveryInfo};
use thiserror::Error;

/// A boxed error from a transport or listener implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A specialized [`Result`] type for remote cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the remote cache tier.
///
/// The variants classify failures by how the propagation pipeline reacts to them, as
/// reported through [`Recovery`]:
///
/// - [`Error::Communication`] is retryable. Queued events hit by it are retried in place.
/// - [`Error::Deserialization`] only matters for reads, which retry it once and then treat
///   the value as absent.
/// - [`Error::Fatal`] means the listener can no longer be used. The owning event queue is
///   destroyed without further retries.
///
/// Future versions may add additional enum variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The event queue has been destroyed and no longer accepts events.
    #[error("event queue for cache '{cache_name}' has been destroyed")]
    QueueDestroyed {
        /// The region the rejected event was addressed to.
        cache_name: String,
    },

    /// The remote peer could not be reached or the call was interrupted.
    #[error("remote cache communication failed")]
    Communication(#[source] BoxError),

    /// The remote peer answered, but the payload could not be reconstructed.
    #[error("remote cache payload could not be deserialized")]
    Deserialization(#[source] BoxError),

    /// The listener failed in a way that retrying cannot fix.
    #[error("remote cache listener failed unexpectedly")]
    Fatal(#[source] BoxError),

    /// A connection group could not be restored.
    #[error("failed to restore connection group '{group}'")]
    Repair {
        /// The name of the connection group.
        group: String,
        /// The underlying cause.
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// Creates a recoverable communication error.
    ///
    /// # Examples
    ///
    /// ```
    /// use cachelon_remote::Error;
    /// use recoverable::{Recovery, RecoveryKind};
    ///
    /// let error = Error::communication("connection reset by peer");
    /// assert_eq!(error.recovery().kind(), RecoveryKind::Retry);
    /// ```
    pub fn communication(cause: impl Into<BoxError>) -> Self {
        Self::Communication(cause.into())
    }

    /// Creates a deserialization error.
    pub fn deserialization(cause: impl Into<BoxError>) -> Self {
        Self::Deserialization(cause.into())
    }

    /// Creates an error that marks the listener as permanently unusable.
    pub fn fatal(cause: impl Into<BoxError>) -> Self {
        Self::Fatal(cause.into())
    }

    /// Creates an error for a failed connection group restore.
    pub fn repair(group: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Repair {
            group: group.into(),
            source: cause.into(),
        }
    }

    pub(crate) fn queue_destroyed(cache_name: &str) -> Self {
        Self::QueueDestroyed {
            cache_name: cache_name.to_owned(),
        }
    }

    /// Returns `true` if the remote payload could not be reconstructed.
    #[must_use]
    pub fn is_deserialization(&self) -> bool {
        matches!(self, Self::Deserialization(_))
    }

    /// Returns `true` if the error reports a destroyed event queue.
    #[must_use]
    pub fn is_queue_destroyed(&self) -> bool {
        matches!(self, Self::QueueDestroyed { .. })
    }
}

// Deserialization failures are retryable for queued deliveries: the payload is rebuilt on
// every attempt, so a one-off framing issue can clear up.
impl Recovery for Error {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Communication(_) | Self::Deserialization(_) => RecoveryInfo::retry(),
            Self::QueueDestroyed { .. } | Self::Fatal(_) | Self::Repair { .. } => RecoveryInfo::never(),
        }
    }
}
