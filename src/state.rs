//! Locating and loading the service configuration.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::IdentifyError;
use crate::types::Config;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV_VAR: &str = "IDRECON_CONFIG";

/// Resolve the config file location: `$IDRECON_CONFIG`, else
/// `~/.idrecon/config.json`.
pub fn config_path() -> Result<PathBuf, IdentifyError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| IdentifyError::Configuration("Could not find home directory".to_string()))?;
    Ok(home.join(".idrecon").join("config.json"))
}

/// Load configuration from the default location. A missing file yields the
/// defaults.
pub fn load_config() -> Result<Config, IdentifyError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config, IdentifyError> {
    if !path.exists() {
        log::debug!("No config at {}; using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| IdentifyError::Configuration(format!("Failed to read config: {}", e)))?;

    let config: Config = serde_json::from_str(&content)
        .map_err(|e| IdentifyError::Configuration(format!("Failed to parse config: {}", e)))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json")).unwrap();
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"dbPath": "/var/lib/idrecon/c.db", "maxIdleConnections": 2}"#)
            .unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/var/lib/idrecon/c.db")));
        assert_eq!(config.max_idle_connections, 2);
    }

    #[test]
    fn test_env_var_overrides_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elsewhere.json");
        fs::write(&path, r#"{"busyTimeoutMs": 42}"#).unwrap();

        // Only this test touches the variable.
        std::env::set_var(CONFIG_ENV_VAR, &path);
        let resolved = config_path();
        let loaded = load_config();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(resolved.unwrap(), path);
        assert_eq!(loaded.unwrap().busy_timeout_ms, 42);
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, IdentifyError::Configuration(_)));
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
