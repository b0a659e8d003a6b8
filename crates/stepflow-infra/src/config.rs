//! Configuration loader for stepflow.
//!
//! Reads `stepflow.toml` and deserializes it into [`StepflowConfig`]. Falls
//! back to sensible defaults when the file is missing or malformed.

use std::path::Path;

use stepflow_types::config::StepflowConfig;
use stepflow_types::error::ConfigError;

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "stepflow.toml";

/// Read and parse a config file, surfacing every failure.
pub async fn read_config(path: &Path) -> Result<StepflowConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;

    toml::from_str::<StepflowConfig>(&content).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`StepflowConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_config(path: &Path) -> StepflowConfig {
    match tokio::fs::try_exists(path).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return StepflowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to stat {}: {err}, using defaults", path.display());
            return StepflowConfig::default();
        }
    }

    match read_config(path).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            StepflowConfig::default()
        }
    }
}
