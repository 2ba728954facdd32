pub mod credits;
pub mod deliberate;
pub mod doctor;
pub mod init;
pub mod migrate;
pub mod serve;

use conclave_config::AppConfig;
use conclave_store::SqliteStore;
use std::path::{Path, PathBuf};

/// Load config from `path` (or the default location), apply environment
/// overrides and validate.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    let mut config =
        AppConfig::load_from(&path).map_err(|e| format!("Failed to load config: {e}"))?;
    config
        .apply_env(|name| std::env::var(name).ok())
        .map_err(|e| format!("Invalid environment override: {e}"))?;
    config
        .validate()
        .map_err(|e| format!("Invalid config: {e}"))?;
    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Open the SQLite database, creating its directory and schema if needed.
pub async fn open_store(path: &Path) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::new(&path.to_string_lossy())
        .await
        .map_err(|e| format!("Failed to open database {}: {e}", path.display()))?;
    Ok(store)
}
