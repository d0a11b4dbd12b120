//! Configuration files for relay
//!
//! Settings live as JSON documents under `~/.config/relay/`. Missing files
//! are not an error for [`load_json_or_default`]; every other read or parse
//! failure carries the offending path.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "relay";

/// Create the config directory if needed and return it
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// `~/.config/relay/` (or the platform equivalent)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Like [`load_json`], but a missing file yields `T::default()`
pub fn load_json_or_default<T: DeserializeOwned + Default>(filename: &str) -> Result<T> {
    match config_path(filename) {
        Some(path) if path.exists() => load_json_file(&path),
        _ => Ok(T::default()),
    }
}

pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

pub fn save_json<T: Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    save_json_file(&dir.join(filename), value)
}

/// Write `value` as pretty JSON, creating parent directories
pub fn save_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}
