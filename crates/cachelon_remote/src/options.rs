// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration for event queues and the recovery monitor.

use std::time::Duration;

/// Default number of failed delivery attempts tolerated before a queue is destroyed.
pub const DEFAULT_MAX_FAILURE: u32 = 10;

/// Default pause between delivery attempts of a failing event.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Shortest idle period the recovery monitor accepts.
pub const MIN_IDLE_PERIOD: Duration = Duration::from_secs(30);

/// Retry policy of an event queue.
///
/// The failure budget is shared by all events of one queue: a queue whose
/// consecutive failures exceed [`max_failure`](Self::max_failure) is destroyed,
/// no matter how many events contributed to them.
///
/// # Examples
///
/// ```
/// use cachelon_remote::QueueOptions;
/// use std::time::Duration;
///
/// let options = QueueOptions::new().max_failure(3).retry_delay(Duration::from_millis(50));
/// assert_eq!(options.get_max_failure(), 3);
///
/// // Zero values fall back to the defaults.
/// let options = QueueOptions::new().max_failure(0).retry_delay(Duration::ZERO);
/// assert_eq!(options, QueueOptions::default());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QueueOptions {
    max_failure: u32,
    #[cfg_attr(feature = "serde", serde(rename = "retry_delay_ms", with = "millis"))]
    retry_delay: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_failure: DEFAULT_MAX_FAILURE,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl QueueOptions {
    /// Creates options with the default retry policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold. Zero selects [`DEFAULT_MAX_FAILURE`].
    ///
    /// The threshold is capped one below `u32::MAX`, so even the largest budget runs out.
    #[must_use]
    pub fn max_failure(mut self, max_failure: u32) -> Self {
        self.max_failure = match max_failure {
            0 => DEFAULT_MAX_FAILURE,
            max_failure => max_failure.min(u32::MAX - 1),
        };
        self
    }

    /// Sets the pause between attempts. Zero selects [`DEFAULT_RETRY_DELAY`].
    #[must_use]
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = if retry_delay.is_zero() { DEFAULT_RETRY_DELAY } else { retry_delay };
        self
    }

    /// Returns the failure threshold.
    #[must_use]
    pub fn get_max_failure(&self) -> u32 {
        self.max_failure
    }

    /// Returns the pause between attempts.
    #[must_use]
    pub fn get_retry_delay(&self) -> Duration {
        self.retry_delay
    }

    // Deserialized values bypass the setters.
    pub(crate) fn normalized(self) -> Self {
        Self::new().max_failure(self.max_failure).retry_delay(self.retry_delay)
    }
}

/// How the recovery monitor decides when to scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MonitorMode {
    /// Stay idle while all connections are healthy and wake on an error notification.
    #[default]
    FailureDriven,
    /// Scan once per idle period, whether or not an error was reported.
    TimeDriven,
}

/// Settings of the recovery monitor.
///
/// # Examples
///
/// ```
/// use cachelon_remote::{MonitorMode, MonitorOptions};
/// use std::time::Duration;
///
/// let options = MonitorOptions::new().idle_period(Duration::from_secs(5));
/// // The idle period never drops below 30 seconds.
/// assert_eq!(options.get_idle_period(), Duration::from_secs(30));
/// assert_eq!(options.get_mode(), MonitorMode::FailureDriven);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MonitorOptions {
    #[cfg_attr(feature = "serde", serde(rename = "idle_period_ms", with = "millis"))]
    idle_period: Duration,
    mode: MonitorMode,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            idle_period: MIN_IDLE_PERIOD,
            mode: MonitorMode::default(),
        }
    }
}

impl MonitorOptions {
    /// Creates options with a 30 second idle period in failure-driven mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pause before each scan, clamped to at least [`MIN_IDLE_PERIOD`].
    #[must_use]
    pub fn idle_period(mut self, idle_period: Duration) -> Self {
        self.idle_period = idle_period.max(MIN_IDLE_PERIOD);
        self
    }

    /// Sets the scan mode.
    #[must_use]
    pub fn mode(mut self, mode: MonitorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the pause before each scan.
    #[must_use]
    pub fn get_idle_period(&self) -> Duration {
        self.idle_period
    }

    /// Returns the scan mode.
    #[must_use]
    pub fn get_mode(&self) -> MonitorMode {
        self.mode
    }

    pub(crate) fn normalized(self) -> Self {
        self.idle_period(self.idle_period)
    }
}

#[cfg(feature = "serde")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
