// src/errors.rs
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyboardError {
    #[error("Failed to install keyboard hook: {0}")]
    HookError(String),

    #[error("Synthetic input failed: {0}")]
    InputError(String),

    #[error("System call failed: {0}")]
    SystemError(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find a configuration directory for this user")]
    HomeDirectoryNotFound,
    #[error("Failed to read config file at {path}: {source}")]
    ReadConfig { path: PathBuf, source: std::io::Error },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Failed to create configuration directory: {source}")]
    CreateConfigDir { source: std::io::Error },
    #[error("Failed to write default configuration: {source}")]
    WriteDefaultConfig { source: std::io::Error },
}

#[derive(Debug, Error)]
pub enum ExpandrError {
    #[error(transparent)]
    Keyboard(#[from] KeyboardError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {source}")]
    Io { #[from] source: std::io::Error },
    #[error("Replacement worker error: {0}")]
    Worker(String),
    #[error("Global keyboard interception is not supported on this platform")]
    UnsupportedPlatform,
}

// Global Result type alias
pub type Result<T> = std::result::Result<T, ExpandrError>;
