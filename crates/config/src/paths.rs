//! Path utilities

use std::path::PathBuf;

/// Data directory (`~/.netsage`, or `./.netsage` without a home directory)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".netsage")
}

/// Default config file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}
