use std::collections::HashMap;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Session ids are unique
/// - No two sessions bind the same debugging port
/// - Numeric limits that would stall or disable the engine
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let mut ids: HashMap<&str, usize> = HashMap::new();
    let mut ports: HashMap<u16, &str> = HashMap::new();
    for (idx, session) in config.sessions.iter().enumerate() {
        if session.id.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "sessions[{}].id cannot be empty",
                idx
            )));
        }
        if ids.insert(session.id.as_str(), idx).is_some() {
            return Err(ConfigError::ValidationError(format!(
                "duplicate session id: {}",
                session.id
            )));
        }
        if let Some(other) = ports.insert(session.debug_port, session.id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "sessions {} and {} both use debug port {}",
                other, session.id, session.debug_port
            )));
        }
        if session.max_items == 0 {
            return Err(ConfigError::ValidationError(format!(
                "sessions[{}].max_items must be at least 1",
                idx
            )));
        }
    }

    if !config.sessions.is_empty() && config.selectors.feed_item.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "selectors.feed_item is required when sessions are configured".to_string(),
        ));
    }

    if config.download.extension.trim_start_matches('.').is_empty() {
        return Err(ConfigError::ValidationError(
            "download.extension cannot be empty".to_string(),
        ));
    }

    if config.watchdog.escalation_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "watchdog.escalation_threshold must be at least 1".to_string(),
        ));
    }

    // A single wait only heartbeats when it ends, so it must fit in one period.
    let waits = [
        ("download.ready_timeout_ms", config.download.ready_timeout_ms),
        ("download.export_start_timeout_ms", config.download.export_start_timeout_ms),
        ("download.file_save_timeout_ms", config.download.file_save_timeout_ms),
    ];
    for (name, wait_ms) in waits {
        if config.watchdog.timeout_ms <= wait_ms {
            return Err(ConfigError::ValidationError(format!(
                "watchdog.timeout_ms ({}) must exceed {} ({})",
                config.watchdog.timeout_ms, name, wait_ms
            )));
        }
    }

    if config.scheduler.max_parallel == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.max_parallel must be at least 1".to_string(),
        ));
    }

    if config.navigator.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "navigator.max_attempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}
