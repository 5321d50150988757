//! Logging bootstrap
//!
//! The library only emits through the `log` facade. Applications and tests
//! that want output call [`init`] once; repeated calls are harmless.

use crate::config::EmulatorConfig;

/// Install an `env_logger` backend at the given level.
///
/// `RUST_LOG` still takes precedence for per-module filters.
pub fn init(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .format_timestamp_millis()
        .try_init();
}

/// Install the logger using the level stored in the emulator configuration
pub fn init_from_config(config: &EmulatorConfig) {
    init(config.log_level.into());
    log::info!(
        "vkgl logging initialized for '{}' ({:?} backend)",
        config.application_name,
        config.backend
    );
}

/// Logger for unit and integration tests
pub fn init_for_tests() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
