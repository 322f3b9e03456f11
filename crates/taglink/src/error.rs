//! CLI error types with miette diagnostics.
//!
//! Maps `ConfigError` and `CoreError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use taglink_config::ConfigError;
use taglink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(taglink::no_config),
        help("Pass a configuration file: taglink check <path/to/taglink.toml>")
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(taglink::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(taglink::config))]
    Config(Box<figment::Error>),

    #[error("{count} tag(s) in the tag table are invalid")]
    #[diagnostic(
        code(taglink::invalid_tags),
        help("{details}")
    )]
    InvalidTags { count: usize, details: String },

    // ── Endpoint ─────────────────────────────────────────────────────
    #[error("No protocol driver available for {address}")]
    #[diagnostic(
        code(taglink::no_driver),
        help("Only the simulated controller is built in. Re-run with --simulate.")
    )]
    NoDriver { address: String },

    #[error("Endpoint error: {0}")]
    #[diagnostic(code(taglink::endpoint))]
    Endpoint(#[from] CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(taglink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Validation { .. } | Self::InvalidTags { .. } | Self::NoDriver { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(err) => Self::Config(err),
        }
    }
}
