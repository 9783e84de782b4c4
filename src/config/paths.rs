//! Where the settings file lives.
//!
//! `VOICE_BRIDGE_CONFIG_DIR` overrides the platform directory; otherwise
//! `dirs::config_dir()/voice-bridge` is used:
//!
//! * Windows: `%APPDATA%\voice-bridge\`
//! * macOS: `~/Library/Application Support/voice-bridge/`
//! * Linux: `~/.config/voice-bridge/`

use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration directory.
pub const CONFIG_DIR_ENV: &str = "VOICE_BRIDGE_CONFIG_DIR";

const APP_NAME: &str = "voice-bridge";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::in_dir(Path::new(&dir)),
            _ => Self::in_dir(
                &dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(APP_NAME),
            ),
        }
    }

    /// Paths rooted at `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config_dir: dir.to_path_buf(),
            settings_file: dir.join(SETTINGS_FILE),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_file_sits_in_config_dir() {
        let paths = AppPaths::in_dir(Path::new("/tmp/vb"));
        assert_eq!(paths.settings_file, PathBuf::from("/tmp/vb/settings.toml"));
        assert_eq!(paths.config_dir, PathBuf::from("/tmp/vb"));
    }

    #[test]
    fn default_paths_name_the_settings_file() {
        let paths = AppPaths::new();
        assert_eq!(
            paths.settings_file.file_name().and_then(|n| n.to_str()),
            Some(SETTINGS_FILE)
        );
        assert!(paths.settings_file.starts_with(&paths.config_dir));
    }
}
