// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Non-blocking remote cache tier with ordered event propagation and connection repair.
//!
//! A local cache region can be backed by a remote cache service so that writes and
//! invalidations reach other processes. This crate provides the fault tolerant path
//! between the two:
//!
//! - [`CacheEventQueue`] delivers puts, removals and disposals to one [`CacheListener`]
//!   strictly in order, retrying transient failures against a queue-wide budget and
//!   destroying itself once the budget is spent.
//! - [`RemoteCacheNoWait`] wraps a [`RemoteCacheClient`]: mutations are queued and return
//!   immediately, reads go straight to the client, and every communication failure
//!   quarantines the queue so the façade reports [`CacheStatus::Error`].
//! - [`RemoteCacheMonitor`] waits for an error notification, then scans every
//!   [`ConnectionGroup`] and restores those with façades in error.
//!
//! # Data Flow
//!
//! Mutations flow caller → façade → event queue → listener. Reads flow caller → façade →
//! client. Failures flow back: a listener failure destroys the queue, the façade reports
//! an error, the monitor repairs the group with [`RemoteCacheNoWait::fix_cache`], and a
//! fresh queue resumes propagation.
//!
//! # Runtime
//!
//! Event queues and the monitor run as Tokio tasks. Constructing a queue, a façade, or
//! starting the monitor must happen inside a Tokio runtime. Retry pauses and idle periods
//! are measured with the [`tick::Clock`] each of them is given.

mod client;
mod element;
pub mod error;
mod event;
pub mod monitor;
mod no_wait;
pub mod options;
pub mod queue;
pub mod registry;

#[doc(inline)]
pub use client::{CacheStatus, RemoteCacheClient};
#[doc(inline)]
pub use element::{CacheElement, ElementAttributes};
#[doc(inline)]
pub use error::{BoxError, Error, Result};
#[doc(inline)]
pub use event::{CacheEvent, CacheListener, ListenerId};
#[doc(inline)]
pub use monitor::{ErrorNotifier, RemoteCacheMonitor};
#[doc(inline)]
pub use no_wait::{RemoteCacheNoWait, RemoteCacheNoWaitBuilder};
#[doc(inline)]
pub use options::{MonitorMode, MonitorOptions, QueueOptions};
#[doc(inline)]
pub use queue::CacheEventQueue;
#[doc(inline)]
pub use registry::{CacheRestore, ConnectionGroup, ConnectionRegistry, Connector, GroupRegistry, GroupRestore, RemoteCacheGroup};
