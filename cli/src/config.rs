// Configuration file handling for the hopmesh CLI
//
// Mesh settings are stored in:
// - macOS / Linux: ~/.config/hopmesh/config.json
// - Windows: %APPDATA%\hopmesh\config.json

use anyhow::{Context, Result};
use hopmesh_core::MeshConfig;
use std::path::{Path, PathBuf};

/// Get the config directory path (cross-platform)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Failed to determine config directory")?
        .join("hopmesh");

    std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

    Ok(config_dir)
}

/// Get the config file path
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Load the config at `path`, or the defaults if nothing has been written yet
pub fn load_or_default(path: &Path) -> Result<MeshConfig> {
    if path.exists() {
        MeshConfig::load(path)
    } else {
        Ok(MeshConfig::default())
    }
}

/// Write the default config to `path`.
///
/// An existing file is kept unless `force` is set. Returns whether a file was written.
pub fn init(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    MeshConfig::default().save(path)?;
    Ok(true)
}

/// Flattened key/value view for display
pub fn entries(config: &MeshConfig) -> Vec<(&'static str, String)> {
    vec![
        ("max_transport_payload", format!("{} bytes", config.max_transport_payload)),
        ("max_segment_size", format!("{} bytes", config.max_segment_size)),
        ("liveness_sweep", format!("{}s", config.liveness_sweep_secs)),
        (
            "last_connection_interval",
            format!("{}s", config.last_connection_interval_secs),
        ),
        ("ping_timeout", format!("{}s", config.ping_timeout_secs)),
        ("exchange_sweep", format!("{}s", config.exchange_sweep_secs)),
        (
            "last_exchange_interval",
            format!("{}s", config.last_exchange_interval_secs),
        ),
        ("segment_resend", format!("{}s", config.segment_resend_secs)),
        ("pending_cleanup", format!("{}s", config.pending_cleanup_secs)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_or_default(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, MeshConfig::default());
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "ping_timeout_secs": 4 }"#).unwrap();

        assert!(!init(&path, false).unwrap());
        assert_eq!(load_or_default(&path).unwrap().ping_timeout_secs, 4);

        assert!(init(&path, true).unwrap());
        assert_eq!(load_or_default(&path).unwrap(), MeshConfig::default());
    }

    #[test]
    fn test_entries_cover_every_setting() {
        let entries = entries(&MeshConfig::default());
        assert_eq!(entries.len(), 9);
        assert!(entries.contains(&("ping_timeout", "10s".to_string())));
    }
}
