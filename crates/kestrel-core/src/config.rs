use crate::poller::PollConfig;
use crate::suite::Settings;
use std::time::Duration;

/// Timeout for waits and assertions that don't set their own
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the locator keeps retrying while the document is unstable
pub const DEFAULT_PROBE_WINDOW: Duration = Duration::from_secs(2);

pub const DEFAULT_CONCURRENCY: usize = 1;

/// Run-wide settings threaded into every step.
///
/// Built from defaults, then the suite's `settings` block, then CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub default_timeout: Duration,
    pub probe_window: Duration,
    pub poll: PollConfig,
    pub concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            probe_window: DEFAULT_PROBE_WINDOW,
            poll: PollConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl RunConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_probe_window(mut self, window: Duration) -> Self {
        self.probe_window = window;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Clamped to at least one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Overlay the values a suite sets explicitly
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(ms) = settings.timeout_ms {
            self.default_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.probe_window_ms {
            self.probe_window = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.poll_initial_ms {
            self.poll.initial_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.poll_max_ms {
            self.poll.max_interval = Duration::from_millis(ms);
        }
        if let Some(concurrency) = settings.concurrency {
            self.concurrency = concurrency.max(1);
        }
        self
    }

    /// Timeout for a step, falling back to the default
    pub fn timeout_for(&self, step_timeout: Option<Duration>) -> Duration {
        step_timeout.unwrap_or(self.default_timeout)
    }
}

/// Serde helpers for `Duration` fields written as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
