use super::{types::Config, ConfigError};
use crate::tunnel::validate_interface_name;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration
///
/// Checks what serde cannot: non-zero limits, a usable interface prefix,
/// a consistent peer set and sane cache bounds.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }
    if config.server.api_key.as_ref().is_some_and(|k| k.trim().is_empty()) {
        return Err(invalid("server.api_key cannot be empty when set"));
    }

    // Tunnels
    let tunnels = &config.tunnels;
    if tunnels.max_tunnels == 0 {
        return Err(invalid("tunnels.max_tunnels must be at least 1"));
    }
    if tunnels.warm_tunnels > tunnels.max_tunnels {
        return Err(invalid(format!(
            "tunnels.warm_tunnels ({}) exceeds tunnels.max_tunnels ({})",
            tunnels.warm_tunnels, tunnels.max_tunnels
        )));
    }
    let widest_name = format!("{}{}", tunnels.interface_prefix, tunnels.max_tunnels - 1);
    validate_interface_name(&widest_name)
        .map_err(|e| invalid(format!("tunnels.interface_prefix: {}", e)))?;
    if tunnels.provision_attempts == 0 {
        return Err(invalid("tunnels.provision_attempts must be at least 1"));
    }
    crate::tunnel::validate_peer_set(&tunnels.peers)
        .map_err(|e| invalid(format!("tunnels.peers: {}", e)))?;
    for peer in &tunnels.peers {
        if let Some(name) = &peer.interface_name {
            if name.starts_with(&tunnels.interface_prefix) {
                return Err(invalid(format!(
                    "tunnel '{}' interface '{}' collides with the generated prefix '{}'",
                    peer.id, name, tunnels.interface_prefix
                )));
            }
        }
    }

    // Scheduler
    let scheduler = &config.scheduler;
    if scheduler.max_concurrent_jobs == 0 {
        return Err(invalid("scheduler.max_concurrent_jobs must be at least 1"));
    }
    if scheduler.queue_capacity == 0 {
        return Err(invalid("scheduler.queue_capacity must be at least 1"));
    }
    if scheduler.max_acquire_attempts == 0 || scheduler.max_fetch_attempts == 0 {
        return Err(invalid("scheduler attempt limits must be at least 1"));
    }
    if scheduler.retry_factor < 1.0 {
        return Err(invalid("scheduler.retry_factor must be >= 1.0"));
    }
    if scheduler.allowed_heights.is_empty() {
        return Err(invalid("scheduler.allowed_heights cannot be empty"));
    }

    // Workers
    if config.fetch.max_size_mb == 0 {
        return Err(invalid("fetch.max_size_mb must be at least 1"));
    }
    if config.fetch.timeout_secs == 0 {
        return Err(invalid("fetch.timeout_secs must be at least 1"));
    }
    if config.transcoder.timeout_secs == 0 {
        return Err(invalid("transcoder.timeout_secs must be at least 1"));
    }

    // Cache
    if config.cache.dir.as_os_str().is_empty() {
        return Err(invalid("cache.dir cannot be empty"));
    }
    if config.cache.dir == scheduler.temp_dir {
        return Err(invalid("cache.dir and scheduler.temp_dir must differ"));
    }

    Ok(())
}
