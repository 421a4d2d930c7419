//! Initialize the configuration directory: create ~/.sapa and a default config file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Fail with a hint to run `sapa init` when the config file is missing.
pub fn require_initialized(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `sapa init` first (config file not found: {})",
            config_path.display()
        );
    }
    Ok(())
}

/// Create the config directory and write the default config (every field spelled out)
/// if no config file exists yet. Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if config_path.exists() {
        log::debug!("config already exists at {}, leaving it", config_path.display());
    } else {
        let json = serde_json::to_string_pretty(&config::Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, json)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_loadable_config_once() {
        let dir = std::env::temp_dir().join(format!("sapa-init-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        assert!(require_initialized(&path).is_err());

        init_config_dir(&path).expect("init");
        require_initialized(&path).expect("initialized");
        let (cfg, _) = config::load_config(Some(path.clone())).expect("load");
        assert_eq!(cfg.gateway.port, 15151);

        std::fs::write(&path, r#"{"gateway":{"port":9999}}"#).expect("write");
        init_config_dir(&path).expect("init again");
        let (cfg, _) = config::load_config(Some(path)).expect("load");
        assert_eq!(cfg.gateway.port, 9999);

        let _ = std::fs::remove_dir_all(dir);
    }
}
