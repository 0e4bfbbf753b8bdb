//! Tunables for a [`Registry`](crate::Registry).

use std::time::Duration;

use backoff::ExponentialBackoff;
use kube_core::params::WatchParams;

/// Parameters shared by every group and watch of a registry.
///
/// ```
/// # use std::time::Duration;
/// let config = kube_watchhub::Config::default()
///     .with_backoff(Duration::from_millis(500), Duration::from_secs(10))
///     .with_health_debounce(Duration::from_secs(1));
/// assert_eq!(config.backoff_ceiling, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// First reconnect delay, and the delay after any healthy event.
    pub backoff_floor: Duration,
    /// Reconnect delays double up to this value.
    pub backoff_ceiling: Duration,
    /// Quiet period before a health summary is recomputed.
    pub health_debounce: Duration,
    /// A metrics query running longer than this counts as unavailable.
    pub metrics_timeout: Duration,
    /// Server-side timeout of a single watch request, in seconds.
    pub server_timeout: Option<u32>,
    /// Ask the apiserver for bookmark events.
    pub bookmarks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backoff_floor: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(30),
            health_debounce: Duration::from_millis(500),
            metrics_timeout: Duration::from_secs(5),
            server_timeout: Some(290),
            bookmarks: true,
        }
    }
}

impl Config {
    pub fn with_backoff(mut self, floor: Duration, ceiling: Duration) -> Self {
        self.backoff_floor = floor;
        self.backoff_ceiling = ceiling.max(floor);
        self
    }

    pub fn with_health_debounce(mut self, debounce: Duration) -> Self {
        self.health_debounce = debounce;
        self
    }

    pub fn with_metrics_timeout(mut self, timeout: Duration) -> Self {
        self.metrics_timeout = timeout;
        self
    }

    /// Must stay below 295 seconds, the apiserver's limit.
    pub fn with_server_timeout(mut self, timeout: Option<u32>) -> Self {
        self.server_timeout = timeout.map(|secs| secs.min(290));
        self
    }

    pub fn with_bookmarks(mut self, bookmarks: bool) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    pub(crate) fn watch_params(&self) -> WatchParams {
        let mut params = WatchParams::default();
        if let Some(timeout) = self.server_timeout {
            params = params.timeout(timeout);
        }
        params.bookmarks = self.bookmarks;
        params
    }

    /// Doubling, jitter-free and never giving up.
    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.backoff_floor,
            initial_interval: self.backoff_floor,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.backoff_ceiling,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}
