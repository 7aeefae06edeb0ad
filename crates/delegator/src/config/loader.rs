use std::path::Path;

use crate::config::schema::DelegatorConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DelegatorConfig, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, format)
}

pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<DelegatorConfig, ConfigError> {
    let config: DelegatorConfig = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        ConfigFormat::Json => serde_json::from_str(content)?,
    };

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &DelegatorConfig) -> Result<(), ConfigError> {
    if config.finalizer.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "finalizer must not be empty".to_string(),
        });
    }

    if config.max_concurrent_reconciles == 0 {
        return Err(ConfigError::Validation {
            message: "maxConcurrentReconciles must be > 0".to_string(),
        });
    }

    if config.wait_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "waitTimeoutSecs must be > 0".to_string(),
        });
    }

    if config.error_backoff_base_ms == 0
        || config.error_backoff_base_ms > config.error_backoff_max_secs.saturating_mul(1000)
    {
        return Err(ConfigError::Validation {
            message: format!(
                "errorBackoffBaseMs ({}) must be > 0 and not exceed errorBackoffMaxSecs ({}s)",
                config.error_backoff_base_ms, config.error_backoff_max_secs
            ),
        });
    }

    if config.watch_poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "watchPollIntervalMs must be > 0".to_string(),
        });
    }

    Ok(())
}
