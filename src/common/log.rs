//! Structured logging setup.
//!
//! The bridge only emits `tracing` events; hosts that already install a
//! subscriber can ignore this module.

use tracing_subscriber::EnvFilter;

use crate::common::config::BridgeCfg;

/// Install a global fmt subscriber honouring `cfg.log_filter`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(cfg: &BridgeCfg) -> bool {
    let filter = EnvFilter::try_new(&cfg.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = if cfg.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}
