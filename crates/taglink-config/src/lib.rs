//! Endpoint configuration for taglink tools.
//!
//! One TOML file describes one controller endpoint and its tag table:
//!
//! ```toml
//! [endpoint]
//! address = "192.168.1.10"
//! cycle_time_ms = 500
//!
//! [vartable.MainProgram]
//! Speed = { type = "REAL" }
//!
//! [vartable.""]
//! Alarm = { type = "BOOL" }
//! ```
//!
//! Loading layers built-in defaults, the file, then `TAGLINK_` environment
//! variables (`TAGLINK_ENDPOINT__ADDRESS=10.0.0.5`), and translates the
//! result into a `taglink_core::EndpointConfig` plus tag definitions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use taglink_core::config::{
    DEFAULT_CYCLE_TIME, DEFAULT_MAX_SKIPPED_CYCLES, DEFAULT_RECONNECT_DELAY, DEFAULT_TIMEOUT,
};
use taglink_core::{CoreError, DataType, EndpointConfig, TagDefinition};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointSection,

    /// Tag table: program name → tag name → entry. The empty program name
    /// holds controller-scoped tags.
    #[serde(default)]
    pub vartable: IndexMap<String, IndexMap<String, VarEntry>>,
}

/// `[endpoint]` section. Durations are whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointSection {
    pub address: String,
    pub slot: u8,
    pub cycle_time_ms: u64,
    pub reconnect_delay_ms: u64,
    pub timeout_ms: u64,
    pub max_skipped_cycles: u32,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            address: String::new(),
            slot: 0,
            cycle_time_ms: as_millis(DEFAULT_CYCLE_TIME),
            reconnect_delay_ms: as_millis(DEFAULT_RECONNECT_DELAY),
            timeout_ms: as_millis(DEFAULT_TIMEOUT),
            max_skipped_cycles: DEFAULT_MAX_SKIPPED_CYCLES,
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// One tag-table entry. An empty or unrecognised type leaves the type to
/// be inferred from the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VarEntry {
    #[serde(default, rename = "type")]
    pub data_type: String,
}

impl Config {
    /// Runtime endpoint configuration, validated.
    pub fn endpoint_config(&self) -> Result<EndpointConfig, ConfigError> {
        let section = &self.endpoint;
        if section.address.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "endpoint.address".into(),
                reason: "must not be empty".into(),
            });
        }

        let config = EndpointConfig {
            address: section.address.trim().to_owned(),
            slot: section.slot,
            cycle_time: Duration::from_millis(section.cycle_time_ms),
            reconnect_delay: Duration::from_millis(section.reconnect_delay_ms),
            timeout: Duration::from_millis(section.timeout_ms),
            max_skipped_cycles: section.max_skipped_cycles,
        };
        config.validate().map_err(|err| ConfigError::Validation {
            field: "endpoint".into(),
            reason: match err {
                CoreError::Config { message } => message,
                other => other.to_string(),
            },
        })?;
        Ok(config)
    }

    /// Flatten the tag table into definitions, program by program.
    pub fn tag_definitions(&self) -> Vec<TagDefinition> {
        self.vartable
            .iter()
            .flat_map(|(program, vars)| {
                let program = Some(program.trim()).filter(|p| !p.is_empty());
                vars.iter().map(move |(name, entry)| {
                    TagDefinition::new(program, name, DataType::from_table(&entry.data_type))
                })
            })
            .collect()
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Default config file location per platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "taglink", "taglink").map_or_else(
        || PathBuf::from("taglink.toml"),
        |dirs| dirs.config_dir().join("taglink.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TAGLINK_").split("__"))
}

/// Load the configuration at `path`, layered with `TAGLINK_` environment
/// variables. The file must exist.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(figment(path).extract()?)
}

/// Load the configuration at the default path.
pub fn load_default_config() -> Result<Config, ConfigError> {
    load_config(&config_path())
}

// ── Tests ───────────────────────────────────────────────────────────
