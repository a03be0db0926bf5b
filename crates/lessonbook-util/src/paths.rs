//! Default paths for lessonbook components
//!
//! Paths are user-writable by default:
//! - Config: `$XDG_CONFIG_HOME/lessonbook/config.toml` or `~/.config/lessonbook/config.toml`
//! - Data: `$XDG_DATA_HOME/lessonbook` or `~/.local/share/lessonbook`

use std::path::PathBuf;

/// Environment variable for overriding the data directory
pub const LESSONBOOK_DATA_DIR_ENV: &str = "LESSONBOOK_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "lessonbook";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "lessonbook.db";

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$LESSONBOOK_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/lessonbook` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/lessonbook` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(LESSONBOOK_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking LESSONBOOK_DATA_DIR.
/// Used for config defaults where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_ends_with_config_toml() {
        let path = default_config_path();
        assert!(path.ends_with("lessonbook/config.toml"));
    }

    #[test]
    fn data_dir_contains_lessonbook() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("lessonbook"));
    }
}
