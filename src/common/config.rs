//! Runtime configuration loaded from the environment.

use std::env;

/// Snapshot of configuration values consumed by the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeCfg {
    /// `tracing` filter directive used by [`crate::common::log::init`].
    pub log_filter: String,
    /// Separator used when joining feed names for `setup_data_feeds`.
    pub feed_delimiter: char,
    /// Emit JSON lines instead of the human readable format.
    pub log_json: bool,
}

impl Default for BridgeCfg {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            feed_delimiter: ';',
            log_json: true,
        }
    }
}

impl BridgeCfg {
    /// Create a configuration snapshot from the process environment.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let feed_delimiter = lookup("DELTA1_FEED_DELIMITER")
            .and_then(|raw| {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Some(ch),
                    _ => None,
                }
            })
            .unwrap_or(defaults.feed_delimiter);

        let log_json = match lookup("DELTA1_LOG_FORMAT").as_deref() {
            Some("text") => false,
            Some("json") => true,
            _ => defaults.log_json,
        };

        Self {
            log_filter: lookup("DELTA1_LOG_FILTER").unwrap_or(defaults.log_filter),
            feed_delimiter,
            log_json,
        }
    }
}
