// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test doubles shared by the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::{
    collections::HashMap,
    hash::Hash,
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use cachelon_remote::{
    CacheElement, CacheListener, CacheRestore, CacheStatus, ConnectionGroup, Connector, Error, ListenerId, RemoteCacheClient,
    Result,
};
use parking_lot::Mutex;
use tick::{Clock, ClockControl};
use tokio::sync::watch;
use tracing_subscriber::fmt::MakeWriter;

const STEP: Duration = Duration::from_millis(100);

/// A manually driven clock and a handle to it.
pub fn clock() -> (ClockControl, Clock) {
    let control = ClockControl::new();
    let clock = control.to_clock();
    (control, clock)
}

/// Lets every task woken so far run until it blocks again.
pub async fn run_pending() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Moves the clock forward in small steps, letting spawned tasks react to each one.
///
/// Timers are registered relative to the time they are first polled, so one big jump
/// would collapse a chain of retry pauses into a single step.
pub async fn advance(control: &ClockControl, duration: Duration) {
    let mut remaining = duration;
    run_pending().await;
    while !remaining.is_zero() {
        let step = remaining.min(STEP);
        control.advance(step);
        remaining -= step;
        run_pending().await;
    }
}

/// Lets queued work run, firing any retry pauses due in the next two seconds.
pub async fn settle(control: &ClockControl) {
    advance(control, Duration::from_secs(2)).await;
}

async fn pass(gate: &watch::Sender<bool>) -> bool {
    let mut gate = gate.subscribe();
    gate.wait_for(|open| *open).await.is_ok()
}

/// An operation observed by [`MockRemoteCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp<K> {
    Put(K),
    Remove(K),
    RemoveAll,
    Dispose,
    Get(K),
}

type FailFn<K> = Box<dyn FnMut(&MockOp<K>) -> Option<Error> + Send>;

/// A remote cache client that stores values in memory, records every call,
/// and fails calls on demand.
pub struct MockRemoteCache<K, V> {
    name: String,
    data: Mutex<HashMap<K, V>>,
    attempts: Mutex<Vec<MockOp<K>>>,
    delivered: Mutex<Vec<MockOp<K>>>,
    fail_when: Mutex<Option<FailFn<K>>>,
    status: Mutex<CacheStatus>,
    handles: Mutex<Vec<u64>>,
    gate: watch::Sender<bool>,
}

impl<K, V> MockRemoteCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            data: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            fail_when: Mutex::new(None),
            status: Mutex::new(CacheStatus::Active),
            handles: Mutex::new(Vec::new()),
            gate: watch::Sender::new(true),
        })
    }

    /// Fails every call for which `predicate` returns an error.
    pub fn fail_when(&self, predicate: impl FnMut(&MockOp<K>) -> Option<Error> + Send + 'static) {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    pub fn stop_failing(&self) {
        *self.fail_when.lock() = None;
    }

    pub fn set_status(&self, status: CacheStatus) {
        *self.status.lock() = status;
    }

    /// Parks every following call until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_modify(|open| *open = false);
    }

    pub fn release(&self) {
        self.gate.send_modify(|open| *open = true);
    }

    pub fn insert(&self, key: K, value: V) {
        self.data.lock().insert(key, value);
    }

    pub fn value(&self, key: &K) -> Option<V> {
        self.data.lock().get(key).cloned()
    }

    /// Every call, including the failed ones.
    pub fn attempts(&self) -> Vec<MockOp<K>> {
        self.attempts.lock().clone()
    }

    /// Only the calls that succeeded.
    pub fn delivered(&self) -> Vec<MockOp<K>> {
        self.delivered.lock().clone()
    }

    /// Handles installed through `replace_handle`, oldest first.
    pub fn handles(&self) -> Vec<u64> {
        self.handles.lock().clone()
    }

    async fn call(&self, op: MockOp<K>) -> Result<()> {
        if !pass(&self.gate).await {
            return Err(connection_refused());
        }

        self.attempts.lock().push(op.clone());
        let failure = self.fail_when.lock().as_mut().and_then(|predicate| predicate(&op));
        if let Some(error) = failure {
            return Err(error);
        }

        self.delivered.lock().push(op);
        Ok(())
    }
}

impl<K, V> CacheListener<K, V> for MockRemoteCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn handle_put(&self, element: &CacheElement<K, V>) -> Result<()> {
        self.call(MockOp::Put(element.key().clone())).await?;
        self.insert(element.key().clone(), element.value().clone());
        Ok(())
    }

    async fn handle_remove(&self, _cache_name: &str, key: &K) -> Result<()> {
        self.call(MockOp::Remove(key.clone())).await?;
        self.data.lock().remove(key);
        Ok(())
    }

    async fn handle_remove_all(&self, _cache_name: &str) -> Result<()> {
        self.call(MockOp::RemoveAll).await?;
        self.data.lock().clear();
        Ok(())
    }

    async fn handle_dispose(&self, _cache_name: &str) -> Result<()> {
        self.call(MockOp::Dispose).await
    }
}

impl<K, V> RemoteCacheClient<K, V> for MockRemoteCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    type Handle = u64;

    async fn get(&self, key: &K) -> Result<Option<V>> {
        self.call(MockOp::Get(key.clone())).await?;
        Ok(self.value(key))
    }

    fn cache_name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> CacheStatus {
        *self.status.lock()
    }

    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn stats(&self) -> String {
        format!("{}: {} entries", self.name, self.size())
    }

    fn replace_handle(&self, handle: u64) {
        self.handles.lock().push(handle);
        self.set_status(CacheStatus::Active);
    }

    fn listener_id(&self) -> ListenerId {
        ListenerId(7)
    }
}

/// Returns a predicate that fails the first `count` matching calls.
pub fn fail_first<K>(count: usize, matches: fn(&MockOp<K>) -> bool, error: fn() -> Error) -> impl FnMut(&MockOp<K>) -> Option<Error> + Send + 'static
where
    K: 'static,
{
    let mut remaining = count;
    move |op| {
        if remaining > 0 && matches(op) {
            remaining -= 1;
            Some(error())
        } else {
            None
        }
    }
}

pub fn is_put<K>(op: &MockOp<K>) -> bool {
    matches!(op, MockOp::Put(_))
}

pub fn is_get<K>(op: &MockOp<K>) -> bool {
    matches!(op, MockOp::Get(_))
}

pub fn connection_refused() -> Error {
    Error::communication("connection refused")
}

pub fn bad_payload() -> Error {
    Error::deserialization("class version mismatch")
}

/// A connector that hands out increasing handles and can be switched off.
#[derive(Debug, Default)]
pub struct MockConnector {
    reachable: Mutex<bool>,
    connects: AtomicU64,
}

impl MockConnector {
    pub fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: Mutex::new(reachable),
            connects: AtomicU64::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        *self.reachable.lock() = reachable;
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Acquire)
    }
}

impl Connector for MockConnector {
    type Handle = u64;

    async fn connect(&self) -> Result<u64> {
        let attempt = self.connects.fetch_add(1, Ordering::AcqRel) + 1;
        if *self.reachable.lock() {
            Ok(attempt)
        } else {
            Err(Error::communication("no route to host"))
        }
    }
}

/// A connection group with scripted statuses and repair outcomes.
#[derive(Debug)]
pub struct MockGroup {
    name: String,
    statuses: Mutex<Vec<CacheStatus>>,
    repairable: Mutex<bool>,
    repair_fails: Mutex<bool>,
    restores: AtomicUsize,
    repairs: Arc<AtomicUsize>,
    gate: Arc<watch::Sender<bool>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockGroup {
    pub fn new(name: &str, statuses: Vec<CacheStatus>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            statuses: Mutex::new(statuses),
            repairable: Mutex::new(true),
            repair_fails: Mutex::new(false),
            restores: AtomicUsize::new(0),
            repairs: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(watch::Sender::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Parks every following repair until [`release_repairs`](Self::release_repairs).
    pub fn hold_repairs(&self) {
        self.gate.send_modify(|open| *open = false);
    }

    pub fn release_repairs(&self) {
        self.gate.send_modify(|open| *open = true);
    }

    /// Repairs started and neither finished nor abandoned.
    pub fn repairs_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max_repairs_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    pub fn set_statuses(&self, statuses: Vec<CacheStatus>) {
        *self.statuses.lock() = statuses;
    }

    pub fn set_repairable(&self, repairable: bool) {
        *self.repairable.lock() = repairable;
    }

    pub fn set_repair_fails(&self, fails: bool) {
        *self.repair_fails.lock() = fails;
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::Acquire)
    }

    pub fn repairs(&self) -> usize {
        self.repairs.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct MockRestore {
    name: String,
    repairable: bool,
    fails: bool,
    repairs: Arc<AtomicUsize>,
    gate: Arc<watch::Sender<bool>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

// Counts a repair as in flight until it completes or its future is dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(count: &Arc<AtomicUsize>, max: &AtomicUsize) -> Self {
        let now = count.fetch_add(1, Ordering::AcqRel) + 1;
        max.fetch_max(now, Ordering::AcqRel);
        Self(Arc::clone(count))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConnectionGroup for MockGroup {
    type Restore = MockRestore;

    fn name(&self) -> &str {
        &self.name
    }

    fn statuses(&self) -> Vec<CacheStatus> {
        self.statuses.lock().clone()
    }

    fn restore(&self) -> MockRestore {
        self.restores.fetch_add(1, Ordering::AcqRel);
        MockRestore {
            name: self.name.clone(),
            repairable: *self.repairable.lock(),
            fails: *self.repair_fails.lock(),
            repairs: Arc::clone(&self.repairs),
            gate: Arc::clone(&self.gate),
            in_flight: Arc::clone(&self.in_flight),
            max_in_flight: Arc::clone(&self.max_in_flight),
        }
    }
}

impl CacheRestore for MockRestore {
    async fn can_repair(&mut self) -> bool {
        self.repairable
    }

    async fn repair(&mut self) -> Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if !pass(&self.gate).await {
            return Err(Error::repair(self.name.clone(), "repair gate dropped"));
        }
        if self.fails {
            return Err(Error::repair(self.name.clone(), "listener registration rejected"));
        }
        self.repairs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Captures formatted log output for assertions.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).to_string()
    }

    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    /// Creates a subscriber writing to this capture. Use with `set_default()`.
    pub fn subscriber(&self) -> impl tracing::Subscriber {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

pub struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
