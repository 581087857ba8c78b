//! TOML configuration: engine settings plus the snippet list.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::errors::ConfigError;
use crate::matcher::KeywordEntry;
use crate::sequencer::DEFAULT_KEYSTROKE_DELAY_MS;
use crate::Result;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CONFIG_DIR_NAME: &str = "expandr";
pub const DEFAULT_PRE_REPLACE_DELAY_MS: u64 = 50;

/// Engine settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub buffer_capacity: usize,
    pub keystroke_delay_ms: u64,
    /// Pause before the first backspace, so the target application has
    /// consumed the trigger character.
    pub pre_replace_delay_ms: u64,
    /// Whether the daemon arms the engine right after start.
    pub enabled_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            keystroke_delay_ms: DEFAULT_KEYSTROKE_DELAY_MS,
            pre_replace_delay_ms: DEFAULT_PRE_REPLACE_DELAY_MS,
            enabled_on_start: true,
        }
    }
}

impl EngineConfig {
    pub fn keystroke_delay(&self) -> Duration {
        Duration::from_millis(self.keystroke_delay_ms)
    }

    pub fn pre_replace_delay(&self) -> Duration {
        Duration::from_millis(self.pre_replace_delay_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Validation(
                "engine.buffer_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub snippets: Vec<KeywordEntry>,
}

impl AppConfig {
    /// Trims surrounding whitespace from every snippet keyword.
    pub fn normalize(&mut self) {
        for snippet in &mut self.snippets {
            snippet.keyword = snippet.keyword.trim().to_string();
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.engine.validate()?;
        let mut seen = HashSet::new();
        for (index, snippet) in self.snippets.iter().enumerate() {
            let number = index + 1;
            if snippet.keyword.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "snippet #{} has an empty keyword",
                    number
                )));
            }
            if snippet.content.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "snippet #{} ({}) has empty content",
                    number, snippet.keyword
                )));
            }
            if !seen.insert(snippet.keyword.trim().to_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "snippet #{} repeats keyword '{}'",
                    number, snippet.keyword
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_config(input: &str) -> Result<AppConfig> {
    let mut config: AppConfig = toml::from_str(input).map_err(ConfigError::Parse)?;
    config.normalize();
    config.validate()?;
    Ok(config)
}

// ----- Configuration Management -----

pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::HomeDirectoryNotFound)?
        .join(CONFIG_DIR_NAME);
    let config_file = config_dir.join(CONFIG_FILE_NAME);

    if config_file.exists() {
        return Ok(config_file);
    }

    fs::create_dir_all(&config_dir).map_err(|e| ConfigError::CreateConfigDir { source: e })?;
    create_default_config(&config_file)?;
    Ok(config_file)
}

pub fn create_default_config(path: &Path) -> Result<()> {
    info!("Writing default configuration to {:?}", path);
    fs::write(path, DEFAULT_CONFIG).map_err(|e| ConfigError::WriteDefaultConfig { source: e })?;
    Ok(())
}

pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let config_str = fs::read_to_string(path).map_err(|e| ConfigError::ReadConfig {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_config(&config_str)
}

pub fn load_config() -> Result<AppConfig> {
    let config_path = get_config_path()?;
    load_config_from(&config_path)
}

const DEFAULT_CONFIG: &str = r#"# expandr configuration.
# Type a keyword followed by space, enter, tab or . , ; ! ? and it is
# replaced with its content.

[engine]
buffer_capacity = 50
keystroke_delay_ms = 5
pre_replace_delay_ms = 50
enabled_on_start = true

[[snippets]]
keyword = "btw"
content = "by the way"

[[snippets]]
keyword = "omw"
content = "on my way"

[[snippets]]
keyword = "pfa"
content = "please find the attached information as requested"

[[snippets]]
keyword = "brb"
content = "be right back"

[[snippets]]
keyword = "sig"
content = """
Kind regards,
Your Name"""
enabled = false
"#;
