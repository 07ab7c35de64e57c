//! Cross-platform paths.

use std::path::PathBuf;

/// Get the application data directory.
///
/// - Linux: `~/.local/share/meetchat`
/// - Windows: `%LOCALAPPDATA%\meetchat`
/// - macOS: `~/Library/Application Support/meetchat`
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meetchat")
}

/// Get the configuration directory.
///
/// - Linux: `~/.config/meetchat`
/// - Windows: `%APPDATA%\meetchat`
/// - macOS: `~/Library/Application Support/meetchat`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meetchat")
}

/// Get the path to the main config file.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Get the path to the local signing identity.
pub fn identity_file_path() -> PathBuf {
    data_dir().join("identity.json")
}

/// Get the path to the key of a locally hosted agent.
pub fn agent_identity_file_path() -> PathBuf {
    data_dir().join("agent_identity.json")
}
