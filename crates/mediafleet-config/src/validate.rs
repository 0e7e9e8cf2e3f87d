//! Field checks applied after parsing and overrides.

use crate::error::{ConfigError, ConfigResult};
use crate::model::ManagerConfig;

const SCHEMES: [&str; 2] = ["http", "https"];
const LOG_FORMATS: [&str; 2] = ["json", "pretty"];

/// Validate a fully assembled configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails.
pub fn validate(config: &ManagerConfig) -> ConfigResult<()> {
    if config.name.trim().is_empty() {
        return Err(ConfigError::invalid("root", "name", None, "must not be empty"));
    }
    if config.port == 0 {
        return Err(ConfigError::invalid(
            "root",
            "port",
            config.port.to_string(),
            "must be between 1 and 65535",
        ));
    }
    check_scheme("root", &config.scheme)?;
    if config.address.trim().is_empty() {
        return Err(ConfigError::invalid("root", "address", None, "must not be empty"));
    }

    check_scheme("registry", &config.registry.scheme)?;
    if config.registry.address.trim().is_empty() {
        return Err(ConfigError::invalid(
            "registry",
            "address",
            None,
            "must not be empty",
        ));
    }
    if config.registry.port == 0 {
        return Err(ConfigError::invalid(
            "registry",
            "port",
            config.registry.port.to_string(),
            "must be between 1 and 65535",
        ));
    }
    if config.registry.media_host_tag.trim().is_empty() {
        return Err(ConfigError::invalid(
            "registry",
            "media_host_tag",
            None,
            "must not be empty",
        ));
    }

    if config.bus.publish_attempts == 0 {
        return Err(ConfigError::invalid(
            "bus",
            "publish_attempts",
            config.bus.publish_attempts.to_string(),
            "must be at least 1",
        ));
    }
    if config.bus.capacity == 0 {
        return Err(ConfigError::invalid(
            "bus",
            "capacity",
            config.bus.capacity.to_string(),
            "must be at least 1",
        ));
    }

    if config.transfer.expiry_hours == 0 {
        return Err(ConfigError::invalid(
            "transfer",
            "expiry_hours",
            config.transfer.expiry_hours.to_string(),
            "must be at least 1",
        ));
    }
    if config.transfer.sweep_interval_secs == 0 {
        return Err(ConfigError::invalid(
            "transfer",
            "sweep_interval_secs",
            config.transfer.sweep_interval_secs.to_string(),
            "must be at least 1",
        ));
    }

    if config.node_client.timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "node_client",
            "timeout_secs",
            config.node_client.timeout_secs.to_string(),
            "must be at least 1",
        ));
    }

    if let Some(format) = &config.logging.format
        && !LOG_FORMATS.contains(&format.as_str())
    {
        return Err(ConfigError::invalid(
            "logging",
            "format",
            format.clone(),
            "must be json or pretty",
        ));
    }
    Ok(())
}

fn check_scheme(section: &'static str, scheme: &str) -> ConfigResult<()> {
    if SCHEMES.contains(&scheme) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            section,
            "scheme",
            scheme.to_string(),
            "must be http or https",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named() -> ManagerConfig {
        ManagerConfig {
            name: "manager".into(),
            ..ManagerConfig::default()
        }
    }

    fn rejected_field(config: &ManagerConfig) -> Option<(&'static str, &'static str)> {
        match validate(config) {
            Err(ConfigError::InvalidField { section, field, .. }) => Some((section, field)),
            _ => None,
        }
    }

    #[test]
    fn defaults_with_a_name_are_valid() {
        assert!(validate(&named()).is_ok());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert_eq!(rejected_field(&ManagerConfig::default()), Some(("root", "name")));
    }

    #[test]
    fn each_bounded_field_is_checked() {
        let mut config = named();
        config.scheme = "ftp".into();
        assert_eq!(rejected_field(&config), Some(("root", "scheme")));

        let mut config = named();
        config.registry.port = 0;
        assert_eq!(rejected_field(&config), Some(("registry", "port")));

        let mut config = named();
        config.bus.publish_attempts = 0;
        assert_eq!(rejected_field(&config), Some(("bus", "publish_attempts")));

        let mut config = named();
        config.transfer.expiry_hours = 0;
        assert_eq!(rejected_field(&config), Some(("transfer", "expiry_hours")));

        let mut config = named();
        config.logging.format = Some("xml".into());
        assert_eq!(rejected_field(&config), Some(("logging", "format")));
    }
}
