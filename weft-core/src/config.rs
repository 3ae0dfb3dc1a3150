//! Runtime configuration.
//!
//! Both structs deserialize from JSON with every field optional, so callers
//! can keep a partial config file and fall back to the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of snapshots kept per store.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Default number of events kept in the recorder feed.
pub const DEFAULT_EVENT_LIMIT: usize = 1000;

/// Limits for the snapshot recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Snapshots retained per store; the oldest is evicted first.
    pub history_limit: usize,
    /// Events retained in the feed; the oldest is evicted first.
    pub event_limit: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            event_limit: DEFAULT_EVENT_LIMIT,
        }
    }
}

impl RecorderConfig {
    /// Parse a config from JSON, filling absent fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Behaviour of an [`AsyncAction`](crate::action::AsyncAction).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncOptions {
    /// Keep the last successful `data` visible while a new dispatch is pending.
    pub stale_while_revalidate: bool,
    /// Extra attempts after a failed handler run.
    pub retries: u32,
    /// Pause between attempts.
    pub retry_delay_ms: u64,
}

impl AsyncOptions {
    /// Parse options from JSON, filling absent fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_config_defaults_missing_fields() {
        let config = RecorderConfig::from_json(r#"{"history_limit": 3}"#).unwrap();
        assert_eq!(config.history_limit, 3);
        assert_eq!(config.event_limit, DEFAULT_EVENT_LIMIT);
    }

    #[test]
    fn async_options_parse() {
        let options =
            AsyncOptions::from_json(r#"{"stale_while_revalidate": true, "retries": 2}"#).unwrap();
        assert!(options.stale_while_revalidate);
        assert_eq!(options.retries, 2);
        assert_eq!(options.retry_delay(), Duration::ZERO);
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(RecorderConfig::from_json("[1, 2]").is_err());
    }
}
