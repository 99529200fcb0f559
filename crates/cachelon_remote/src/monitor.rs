// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Background repair of broken remote cache connections.
//!
//! The monitor normally runs failure-driven: while every connection is healthy it
//! waits for an [`ErrorNotifier::notify_error`] call. Once woken it pauses for the
//! idle period, then scans every connection group and restores those in error.
//! Groups it cannot restore yet keep the monitor polling once per idle period until
//! every group is healthy again.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tick::Clock;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{CacheRestore, ConnectionGroup, ConnectionRegistry, MonitorMode, MonitorOptions, Result};

struct MonitorState {
    all_healthy: AtomicBool,
    wake: Notify,
    // Both only change through setters that take the lock.
    settings: Mutex<MonitorOptions>,
    rounds: AtomicU64,
    // Held for the duration of a scan; a restarted loop waits for a stale one to let go.
    scanning: tokio::sync::Mutex<()>,
}

impl MonitorState {
    fn mark_unhealthy(&self) {
        self.all_healthy.store(false, Ordering::Release);
    }
}

/// Wakes a recovery monitor when a remote connection fails.
///
/// Cheap to clone; hand one to every façade and event queue that should report errors.
#[derive(Clone)]
pub struct ErrorNotifier {
    state: Arc<MonitorState>,
}

impl ErrorNotifier {
    /// Marks the connections as unhealthy and wakes the monitor.
    pub fn notify_error(&self) {
        tracing::debug!("recovery monitor notified of an error");
        self.state.mark_unhealthy();
        self.state.wake.notify_one();
    }
}

impl Debug for ErrorNotifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorNotifier").finish_non_exhaustive()
    }
}

/// Scans a [`ConnectionRegistry`] for façades in error and restores them.
///
/// Construct one per process, hand out [`notifier`](Self::notifier)s, and call
/// [`start`](Self::start). The scan loop runs on the Tokio runtime until
/// [`stop`](Self::stop) is called or the monitor is dropped.
///
/// # Examples
///
/// ```ignore
/// let registry = Arc::new(GroupRegistry::new());
/// let clock = Clock::new_tokio();
/// let monitor = RemoteCacheMonitor::new(Arc::clone(&registry), &clock, MonitorOptions::default());
/// monitor.start();
///
/// let cache = RemoteCacheNoWait::builder(client, &clock).notifier(monitor.notifier()).build();
/// ```
pub struct RemoteCacheMonitor<R> {
    registry: Arc<R>,
    clock: Clock,
    state: Arc<MonitorState>,
    task: Mutex<Option<MonitorTask>>,
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl<R> RemoteCacheMonitor<R>
where
    R: ConnectionRegistry + 'static,
    R::Group: 'static,
{
    /// Creates a stopped monitor over `registry` that measures idle periods with `clock`.
    #[must_use]
    pub fn new(registry: Arc<R>, clock: &Clock, options: MonitorOptions) -> Self {
        Self {
            registry,
            clock: clock.clone(),
            state: Arc::new(MonitorState {
                all_healthy: AtomicBool::new(true),
                wake: Notify::new(),
                settings: Mutex::new(options.normalized()),
                rounds: AtomicU64::new(0),
                scanning: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Starts the scan loop. Returns `false` if it is already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            Arc::clone(&self.registry),
            Arc::clone(&self.state),
            self.clock.clone(),
            cancel.clone(),
        ));
        *task = Some(MonitorTask { cancel, handle });
        true
    }
}

impl MonitorTask {
    fn shutdown(self) {
        self.cancel.cancel();
        tracing::debug!(finished = self.handle.is_finished(), "recovery monitor stopping");
    }
}

impl<R> RemoteCacheMonitor<R> {
    /// Stops the scan loop. Returns `false` if it was not running.
    ///
    /// A scan in progress is abandoned at its next await point. A loop started again right
    /// away waits for the abandoned scan to let go before it scans itself.
    pub fn stop(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return false;
        };
        task.shutdown();
        true
    }

    /// Returns `true` while the scan loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.handle.is_finished())
    }

    /// Returns a handle that wakes this monitor.
    #[must_use]
    pub fn notifier(&self) -> ErrorNotifier {
        ErrorNotifier {
            state: Arc::clone(&self.state),
        }
    }

    /// Marks the connections as unhealthy and wakes the scan loop.
    pub fn notify_error(&self) {
        self.notifier().notify_error();
    }

    /// Returns `false` once an error has been reported and not yet cleared by a scan.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state.all_healthy.load(Ordering::Acquire)
    }

    /// Raises the pause before each scan. Shorter periods than the current one are ignored.
    pub fn set_idle_period(&self, idle_period: Duration) {
        let mut settings = self.state.settings.lock();
        if idle_period > settings.get_idle_period() {
            *settings = settings.idle_period(idle_period);
        }
    }

    /// Returns the pause before each scan.
    #[must_use]
    pub fn idle_period(&self) -> Duration {
        self.state.settings.lock().get_idle_period()
    }

    /// Switches between failure-driven and time-driven scanning.
    ///
    /// Nothing switches modes automatically; this is the only way to enter
    /// [`MonitorMode::TimeDriven`].
    pub fn set_mode(&self, mode: MonitorMode) {
        let mut settings = self.state.settings.lock();
        *settings = settings.mode(mode);
        drop(settings);
        // A failure-driven loop may be parked waiting for an error.
        self.state.wake.notify_one();
    }

    /// Returns the scan mode.
    #[must_use]
    pub fn mode(&self) -> MonitorMode {
        self.state.settings.lock().get_mode()
    }

    /// Returns the number of completed scans.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.state.rounds.load(Ordering::Acquire)
    }
}

impl<R> Drop for RemoteCacheMonitor<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.shutdown();
        }
    }
}

impl<R> Debug for RemoteCacheMonitor<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCacheMonitor")
            .field("healthy", &self.is_healthy())
            .field("settings", &*self.state.settings.lock())
            .field("rounds", &self.rounds())
            .finish_non_exhaustive()
    }
}

async fn run<R>(registry: Arc<R>, state: Arc<MonitorState>, clock: Clock, cancel: CancellationToken)
where
    R: ConnectionRegistry,
{
    tracing::debug!("recovery monitor started");

    loop {
        let (mode, idle_period) = {
            let settings = state.settings.lock();
            (settings.get_mode(), settings.get_idle_period())
        };

        match mode {
            MonitorMode::FailureDriven if state.all_healthy.load(Ordering::Acquire) => {
                tracing::debug!("failure driven mode: waiting for an error");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = state.wake.notified() => {}
                }
            }
            MonitorMode::FailureDriven => {}
            MonitorMode::TimeDriven => {
                tracing::debug!(idle_period_ms = idle_period.as_millis(), "time driven mode: sleeping");
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = clock.delay(idle_period) => {}
        }

        let _scanning = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            guard = state.scanning.lock() => guard,
        };

        // Presume every error can be fixed until a group proves otherwise.
        state.all_healthy.store(true, Ordering::Release);
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // The abandoned scan proves nothing about the groups it did not reach.
                state.mark_unhealthy();
                state.wake.notify_one();
                break;
            }
            () = scan(&*registry, &state) => {}
        }
        state.rounds.fetch_add(1, Ordering::AcqRel);
    }

    tracing::debug!("recovery monitor stopped");
}

async fn scan<R>(registry: &R, state: &MonitorState)
where
    R: ConnectionRegistry,
{
    for group in registry.groups() {
        if let Err(error) = scan_group(&*group, state).await {
            state.mark_unhealthy();
            tracing::error!(group = group.name(), error = %error, "failed to restore connection group");
        }
    }
}

/// Restores a group if any of its façades is in error.
///
/// One broken façade means the shared connection is broken, so only the first one
/// found decides; the rest of the group is fixed or deferred along with it.
async fn scan_group<G>(group: &G, state: &MonitorState) -> Result<()>
where
    G: ConnectionGroup,
{
    if !group.statuses().into_iter().any(|status| status.is_error()) {
        return Ok(());
    }

    let mut restore = group.restore();
    if restore.can_repair().await {
        restore.repair().await?;
    } else {
        tracing::debug!(group = group.name(), "connection group cannot be restored yet");
        state.mark_unhealthy();
    }

    Ok(())
}
