mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    // Relative data directories are relative to the config file
    if config.lessons.data_dir.is_relative() {
        if let Some(parent) = path.parent() {
            config.lessons.data_dir = parent.join(&config.lessons.data_dir);
        }
    }

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./tablekit.toml", "~/.config/tablekit/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.database.pool_size == 0 {
        anyhow::bail!("Database pool_size cannot be 0");
    }

    if let Some(url) = &config.database.url {
        if url.trim().is_empty() {
            anyhow::bail!("Database url cannot be empty");
        }
        url.parse::<tablekit_db::pool::DatabaseUrl>()
            .with_context(|| format!("Invalid database url: {url}"))?;
    }

    if config.lessons.data_dir.as_os_str().is_empty() {
        anyhow::bail!("Lessons data_dir cannot be empty");
    }

    Ok(())
}
