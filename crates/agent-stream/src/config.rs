use std::time::Duration;

use crate::errors::StreamError;

/// Default flush cadence for assistant text (~60 Hz).
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(16);
/// Default window after which a subscription that never delivered is re-checked.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_millis(1500);

/// Timing configuration for a `StreamSupervisor`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Delay used to coalesce text fragments before publishing the transcript.
    pub throttle_interval: Duration,
    /// How long a subscription may stay `connecting` before its run status is
    /// re-queried.
    pub liveness_window: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            liveness_window: DEFAULT_LIVENESS_WINDOW,
        }
    }
}

impl StreamConfig {
    /// Builds a config from the defaults overridden by environment variables.
    ///
    /// - `AGENT_STREAM_THROTTLE_MS`: flush cadence in milliseconds.
    /// - `AGENT_STREAM_LIVENESS_MS`: liveness window in milliseconds.
    pub fn from_env() -> Result<Self, StreamError> {
        let mut config = Self::default();
        if let Some(ms) = read_millis("AGENT_STREAM_THROTTLE_MS")? {
            config.throttle_interval = ms;
        }
        if let Some(ms) = read_millis("AGENT_STREAM_LIVENESS_MS")? {
            config.liveness_window = ms;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the flush cadence.
    pub fn throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    /// Overrides the liveness window.
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.throttle_interval.is_zero() {
            return Err(StreamError::Config(
                "throttle_interval must be greater than 0".into(),
            ));
        }
        if self.liveness_window.is_zero() {
            return Err(StreamError::Config(
                "liveness_window must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn read_millis(key: &str) -> Result<Option<Duration>, StreamError> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|e| StreamError::Config(format!("invalid {key}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_sixty_hz_and_liveness_window() {
        let config = StreamConfig::default();
        assert_eq!(config.throttle_interval, Duration::from_millis(16));
        assert_eq!(config.liveness_window, Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_durations_are_rejected() {
        let err = StreamConfig::default()
            .throttle_interval(Duration::ZERO)
            .validate();
        assert!(matches!(err, Err(StreamError::Config(msg)) if msg.contains("throttle_interval")));

        let err = StreamConfig::default()
            .liveness_window(Duration::ZERO)
            .validate();
        assert!(matches!(err, Err(StreamError::Config(msg)) if msg.contains("liveness_window")));
    }
}
