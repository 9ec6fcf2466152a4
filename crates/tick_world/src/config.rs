//! Engine configuration from `tick_world.toml` and `TICK_WORLD_*` variables.
//!
//! Scalar settings are flat keys. A config file value wins over the
//! environment for the same key. Game rules come from an optional `[rules]`
//! table in the file; missing rule fields keep their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tick_world_abi::SandboxLimits;

use crate::rules::GameRules;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "tick_world.toml";

pub const ENV_MAX_FUEL: &str = "TICK_WORLD_MAX_FUEL";
pub const ENV_MAX_MEM_BYTES: &str = "TICK_WORLD_MAX_MEM_BYTES";
pub const ENV_MAX_CPU_MS: &str = "TICK_WORLD_MAX_CPU_MS";
pub const ENV_MAX_INTENTS: &str = "TICK_WORLD_MAX_INTENTS";
pub const ENV_MAX_CONSOLE_BYTES: &str = "TICK_WORLD_MAX_CONSOLE_BYTES";
pub const ENV_MAX_MEMORY_BYTES: &str = "TICK_WORLD_MAX_MEMORY_BYTES";
pub const ENV_PARALLEL: &str = "TICK_WORLD_PARALLEL";

const RULES_TABLE: &str = "rules";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("read config file failed ({path}): {message}")]
    ReadConfigFile { path: String, message: String },
    #[error("parse config file failed ({path}): {message}")]
    ParseConfigFile { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Fan sandboxes and rooms out over the rayon pool.
    pub parallel: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub sandbox: SandboxLimits,
    pub driver: DriverConfig,
    pub rules: GameRules,
}

impl EngineConfig {
    pub fn from_default_sources() -> Result<Self, ConfigError> {
        let config_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::from_config_file(config_path);
        }
        Self::from_env()
    }

    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let path_text = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|err| ConfigError::ReadConfigFile {
            path: path_text.clone(),
            message: err.to_string(),
        })?;
        let value: toml::Value = toml::from_str(&content).map_err(|err| ConfigError::ParseConfigFile {
            path: path_text.clone(),
            message: err.to_string(),
        })?;
        let table = value.as_table().ok_or_else(|| ConfigError::ParseConfigFile {
            path: path_text.clone(),
            message: "root is not a TOML table".to_string(),
        })?;

        let mut config = Self::from_env_with(|key| {
            table
                .get(key)
                .and_then(toml_value_to_string)
                .or_else(|| std::env::var(key).ok())
        })?;
        if let Some(rules) = table.get(RULES_TABLE) {
            config.rules = rules
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| ConfigError::ParseConfigFile {
                    path: path_text,
                    message: err.to_string(),
                })?;
        }
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    fn from_env_with<F>(mut getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = SandboxLimits::default();
        let sandbox = SandboxLimits {
            max_fuel: parse_or(&mut getter, ENV_MAX_FUEL, defaults.max_fuel)?,
            max_mem_bytes: parse_or(&mut getter, ENV_MAX_MEM_BYTES, defaults.max_mem_bytes)?,
            max_cpu_ms: parse_or(&mut getter, ENV_MAX_CPU_MS, defaults.max_cpu_ms)?,
            max_intents: parse_or(&mut getter, ENV_MAX_INTENTS, defaults.max_intents)?,
            max_console_bytes: parse_or(&mut getter, ENV_MAX_CONSOLE_BYTES, defaults.max_console_bytes)?,
            max_memory_bytes: parse_or(&mut getter, ENV_MAX_MEMORY_BYTES, defaults.max_memory_bytes)?,
        };
        let driver = DriverConfig {
            parallel: parse_or(&mut getter, ENV_PARALLEL, DriverConfig::default().parallel)?,
        };
        Ok(Self {
            sandbox,
            driver,
            rules: GameRules::default(),
        })
    }
}

fn parse_or<F, T>(getter: &mut F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match getter(key).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

fn toml_value_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(value) => Some(value.clone()),
        toml::Value::Integer(value) => Some(value.to_string()),
        toml::Value::Float(value) => Some(value.to_string()),
        toml::Value::Boolean(value) => Some(value.to_string()),
        _ => None,
    }
}
