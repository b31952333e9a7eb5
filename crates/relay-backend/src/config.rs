use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::relay_manager::RelayManagerConfig;

/// Shortest tick interval the driver will run with.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Backend configuration.
///
/// All fields have defaults suited to a production relay fleet. Override them
/// with the builder methods, or from the environment:
///
/// ```rust
/// use relay_backend::BackendConfig;
/// use std::time::Duration;
///
/// let config = BackendConfig::new()
///     .tick_interval(Duration::from_millis(500))
///     .rtt_tolerance(2);
/// assert_eq!(config.rtt_tolerance, 2);
/// ```
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Jitter above this (ms) makes a sample or pair unroutable.
    pub max_jitter: f32,
    /// Packet loss above this (percent) makes a sample or pair unroutable.
    pub max_packet_loss: f32,
    /// Relays and pairs silent for this long are inactive.
    pub staleness_secs: u64,
    /// Samples kept per relay pair.
    pub history_size: usize,
    /// Interval between matrix computations. Never shorter than
    /// [`MIN_TICK_INTERVAL`] once the driver runs.
    pub tick_interval: Duration,
    /// Minimum improvement (ms) a route needs over the direct path.
    pub rtt_tolerance: u32,
    /// Optimizer segments. `None` sizes them from the relay count and CPUs.
    pub num_segments: Option<usize>,
    /// Analytics events buffered before new ones are dropped.
    pub analytics_capacity: usize,
    /// Tasks draining the analytics queue.
    pub analytics_workers: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        Self {
            max_jitter: 100.0,
            max_packet_loss: 1.0,
            staleness_secs: 10,
            history_size: 300,
            tick_interval: Duration::from_secs(1),
            rtt_tolerance: 1,
            num_segments: None,
            analytics_capacity: 1024,
            analytics_workers: 2,
        }
    }

    /// Defaults overridden by any `RELAY_BACKEND_*` variable that is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue { var, value }),
            }
        }

        let mut c = Self::new();
        if let Some(v) = parse(&lookup, "RELAY_BACKEND_MAX_JITTER")? {
            c.max_jitter = v;
        }
        if let Some(v) = parse(&lookup, "RELAY_BACKEND_MAX_PACKET_LOSS")? {
            c.max_packet_loss = v;
        }
        if let Some(v) = parse(&lookup, "RELAY_BACKEND_STALENESS_SECS")? {
            c.staleness_secs = v;
        }
        if let Some(v) = parse(&lookup, "RELAY_BACKEND_HISTORY_SIZE")? {
            c.history_size = v;
        }
        if let Some(ms) = parse::<u64>(&lookup, "RELAY_BACKEND_TICK_MS")? {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "RELAY_BACKEND_TICK_MS",
                    value: ms.to_string(),
                });
            }
            c.tick_interval = Duration::from_millis(ms);
        }
        if let Some(v) = parse(&lookup, "RELAY_BACKEND_RTT_TOLERANCE")? {
            c.rtt_tolerance = v;
        }
        if let Some(v) = parse::<usize>(&lookup, "RELAY_BACKEND_SEGMENTS")? {
            c.num_segments = Some(v.max(1));
        }
        if let Some(v) = parse(&lookup, "RELAY_BACKEND_ANALYTICS_CAPACITY")? {
            c.analytics_capacity = v;
        }
        if let Some(v) = parse(&lookup, "RELAY_BACKEND_ANALYTICS_WORKERS")? {
            c.analytics_workers = v;
        }
        Ok(c)
    }

    pub fn max_jitter(mut self, ms: f32) -> Self {
        self.max_jitter = ms;
        self
    }

    pub fn max_packet_loss(mut self, percent: f32) -> Self {
        self.max_packet_loss = percent;
        self
    }

    pub fn staleness_secs(mut self, secs: u64) -> Self {
        self.staleness_secs = secs;
        self
    }

    pub fn history_size(mut self, samples: usize) -> Self {
        self.history_size = samples;
        self
    }

    /// Clamped to [`MIN_TICK_INTERVAL`].
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(MIN_TICK_INTERVAL);
        self
    }

    pub fn rtt_tolerance(mut self, ms: u32) -> Self {
        self.rtt_tolerance = ms;
        self
    }

    pub fn num_segments(mut self, segments: usize) -> Self {
        self.num_segments = Some(segments.max(1));
        self
    }

    pub fn analytics_capacity(mut self, capacity: usize) -> Self {
        self.analytics_capacity = capacity;
        self
    }

    pub fn analytics_workers(mut self, workers: usize) -> Self {
        self.analytics_workers = workers;
        self
    }

    /// The slice of this config the relay manager cares about.
    pub fn relay_manager(&self) -> RelayManagerConfig {
        RelayManagerConfig {
            staleness_secs: self.staleness_secs,
            history_size: self.history_size,
            max_jitter: self.max_jitter,
            max_packet_loss: self.max_packet_loss,
        }
    }
}
