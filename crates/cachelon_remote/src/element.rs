// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache elements and the attributes that travel with them.

use std::{sync::Arc, time::Duration};

/// Per-element settings that travel with a value to auxiliary caches.
///
/// All settings are optional hints for the receiving side. The propagation
/// pipeline never interprets them.
///
/// # Examples
///
/// ```
/// use cachelon_remote::ElementAttributes;
/// use std::time::Duration;
///
/// let attributes = ElementAttributes::new()
///     .max_life(Duration::from_secs(600))
///     .remote(true);
/// assert_eq!(attributes.get_max_life(), Some(Duration::from_secs(600)));
/// assert!(attributes.is_remote());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementAttributes {
    max_life: Option<Duration>,
    idle_time: Option<Duration>,
    eternal: bool,
    lateral: bool,
    remote: bool,
}

// Setters use plain names and getters use a `get_` prefix, as setters are used far more often.
impl ElementAttributes {
    /// Creates attributes with every setting unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long the element may live after creation.
    #[must_use]
    pub fn max_life(mut self, max_life: Duration) -> Self {
        self.max_life = Some(max_life);
        self
    }

    /// Sets how long the element may stay unused before it expires.
    #[must_use]
    pub fn idle_time(mut self, idle_time: Duration) -> Self {
        self.idle_time = Some(idle_time);
        self
    }

    /// Marks the element as never expiring.
    #[must_use]
    pub fn eternal(mut self, eternal: bool) -> Self {
        self.eternal = eternal;
        self
    }

    /// Allows or forbids distribution to lateral peers.
    #[must_use]
    pub fn lateral(mut self, lateral: bool) -> Self {
        self.lateral = lateral;
        self
    }

    /// Allows or forbids distribution to the remote cache service.
    #[must_use]
    pub fn remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    /// Returns the maximum life, if set.
    #[must_use]
    pub fn get_max_life(&self) -> Option<Duration> {
        self.max_life
    }

    /// Returns the idle time, if set.
    #[must_use]
    pub fn get_idle_time(&self) -> Option<Duration> {
        self.idle_time
    }

    /// Returns `true` if the element never expires.
    #[must_use]
    pub fn is_eternal(&self) -> bool {
        self.eternal
    }

    /// Returns `true` if the element may be sent to lateral peers.
    #[must_use]
    pub fn is_lateral(&self) -> bool {
        self.lateral
    }

    /// Returns `true` if the element may be sent to the remote cache service.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote
    }
}

/// A key/value pair addressed to one cache region.
///
/// Elements are immutable once built; a queued put event carries one and
/// hands the same element to every delivery attempt.
///
/// # Examples
///
/// ```
/// use cachelon_remote::CacheElement;
///
/// let element = CacheElement::new("users", "alice".to_string(), 42);
/// assert_eq!(element.cache_name(), "users");
/// assert_eq!(element.key(), "alice");
/// assert_eq!(*element.value(), 42);
/// assert!(element.attributes().is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheElement<K, V> {
    cache_name: Arc<str>,
    key: K,
    value: V,
    attributes: Option<ElementAttributes>,
}

impl<K, V> CacheElement<K, V> {
    /// Creates an element without attributes.
    pub fn new(cache_name: impl Into<Arc<str>>, key: K, value: V) -> Self {
        Self {
            cache_name: cache_name.into(),
            key,
            value,
            attributes: None,
        }
    }

    /// Attaches attributes to the element.
    #[must_use]
    pub fn with_attributes(mut self, attributes: ElementAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Returns the region this element belongs to.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the attributes, if any were attached.
    #[must_use]
    pub fn attributes(&self) -> Option<&ElementAttributes> {
        self.attributes.as_ref()
    }

    /// Consumes the element, returning its key and value.
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}
