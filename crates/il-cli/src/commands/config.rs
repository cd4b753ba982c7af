//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use il_core::config::{self, LinkConfig};

use crate::output::{print_error, print_info, print_json, print_success, print_warning};

/// Load the config file, falling back to defaults when none exists
///
/// An explicitly given path must exist; the default path is optional.
/// Returns the config and the path it was (or would be) read from.
pub fn load_link_config(config_path: Option<&Path>) -> Result<(LinkConfig, PathBuf)> {
    match config_path {
        Some(path) => {
            let config = config::load_config(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?;
            Ok((config, path.to_path_buf()))
        }
        None => {
            let path = config::default_config_path();
            if path.exists() {
                let config = config::load_config(&path)
                    .with_context(|| format!("Failed to load config from {:?}", path))?;
                Ok((config, path))
            } else {
                tracing::debug!("Using default configuration");
                Ok((LinkConfig::default(), path))
            }
        }
    }
}

/// Print the effective configuration
pub fn config_show(config: &LinkConfig, path: &Path, json: bool) -> Result<()> {
    if json {
        return print_json(config);
    }

    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file at {:?}, showing defaults", path));
    }
    println!();
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Print the configuration file path
pub fn config_path(path: &Path) {
    println!("{}", path.display());
}

/// Write a default configuration file
pub fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(path, &LinkConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(load_link_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        config_init(&path, false).unwrap();
        let (config, loaded_from) = load_link_config(Some(&path)).unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(loaded_from, path);
    }

    #[test]
    fn test_init_does_not_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "udid = \"KEEP\"\n").unwrap();

        config_init(&path, false).unwrap();
        let (config, _) = load_link_config(Some(&path)).unwrap();
        assert_eq!(config.udid.as_deref(), Some("KEEP"));

        config_init(&path, true).unwrap();
        let (config, _) = load_link_config(Some(&path)).unwrap();
        assert!(config.udid.is_none());
    }
}
