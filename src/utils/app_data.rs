use crate::index::types::IndexConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "shardex";
const CONFIG_FILE: &str = "config.json";

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join(CONFIG_FILE))
}

/// Load the index config with priority: environment > config file > defaults.
///
/// An empty `data_dirs` list resolves to `<app data>/data`.
pub fn load_config() -> Result<IndexConfig> {
    let config_path = get_config_path()?;
    let mut config = load_config_from(&config_path)?;

    apply_env_overrides(&mut config);

    if config.data_dirs.is_empty() {
        config.data_dirs.push(get_app_data_dir()?.join("data"));
    }

    config.validate().context("Invalid index configuration")?;
    Ok(config)
}

/// Read a config file, returning defaults when it does not exist
pub fn load_config_from(path: &Path) -> Result<IndexConfig> {
    if !path.exists() {
        return Ok(IndexConfig::default());
    }

    let content = fs::read_to_string(path).context("Failed to read config file")?;
    let config: IndexConfig =
        serde_json::from_str(&content).context("Failed to parse config file")?;
    Ok(config)
}

fn apply_env_overrides(config: &mut IndexConfig) {
    if let Ok(val) = std::env::var("SHARDEX_DATA_DIR") {
        config.data_dirs = std::env::split_paths(&val).collect();
    }

    if let Ok(val) = std::env::var("SHARDEX_FT_SHARDS") {
        if let Ok(n) = val.parse() {
            config.ft_num_shards = n;
        }
    }

    if let Ok(val) = std::env::var("SHARDEX_HT_SHARDS") {
        if let Ok(n) = val.parse() {
            config.ht_num_shards = n;
        }
    }

    if let Ok(val) = std::env::var("SHARDEX_THREADS") {
        if let Ok(n) = val.parse() {
            config.num_threads_indexing = n;
            config.num_threads_merging = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.ft_num_shards, IndexConfig::default().ft_num_shards);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let config = IndexConfig {
            ft_num_shards: 4,
            directory_size: 31,
            ..IndexConfig::with_data_dir(dir.path())
        };
        fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let parsed = load_config_from(&path).unwrap();
        assert_eq!(parsed.ft_num_shards, 4);
        assert_eq!(parsed.directory_size, 31);
        assert_eq!(parsed.data_dirs, vec![dir.path().to_path_buf()]);
    }

    #[test]
    fn test_bad_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config_from(&path).is_err());
    }
}
