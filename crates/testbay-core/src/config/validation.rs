//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::WorkspaceConfig;

/// Validate configuration
pub fn validate_config(config: &WorkspaceConfig) -> Result<()> {
    debug!("validating configuration");
    validate_spaces(config)?;
    validate_package_lists(config)?;
    validate_limits(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_spaces(config: &WorkspaceConfig) -> Result<()> {
    let spaces = [
        ("spaces.source", &config.spaces.source),
        ("spaces.build", &config.spaces.build),
        ("spaces.devel", &config.spaces.devel),
        ("spaces.install", &config.spaces.install),
        ("spaces.log", &config.spaces.log),
    ];

    for (field, value) in spaces {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: "space name cannot be empty".to_string(),
            }
            .into());
        }
    }

    let results = [
        &config.spaces.build,
        &config.spaces.devel,
        &config.spaces.install,
    ];
    for (i, a) in results.iter().enumerate() {
        if results[i + 1..].contains(a) {
            return Err(ConfigError::InvalidValue {
                field: "spaces".to_string(),
                message: format!("build, devel and install spaces must differ ('{}' repeated)", a),
            }
            .into());
        }
    }

    Ok(())
}

fn validate_package_lists(config: &WorkspaceConfig) -> Result<()> {
    if let Some(name) = config.allow.iter().find(|p| config.deny.contains(p)) {
        return Err(ConfigError::InvalidValue {
            field: "allow".to_string(),
            message: format!("package '{}' is both allowed and denied", name),
        }
        .into());
    }
    Ok(())
}

fn validate_limits(config: &WorkspaceConfig) -> Result<()> {
    if config.status_rate < 0.0 || !config.status_rate.is_finite() {
        return Err(ConfigError::InvalidValue {
            field: "status_rate".to_string(),
            message: "must be greater than or equal to zero".to_string(),
        }
        .into());
    }

    if config.parallel_packages == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "parallel_packages".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }

    Ok(())
}
