//! Unified error handling for `build-trigger`.
//!
//! [`TriggerError`] is the single error type of the crate. Configuration
//! problems are grouped in [`ConfigError`]; REST failures are carried as-is
//! from `stash-api`. Small env-var helpers live here as well.

use stash_api::StashApiError;
use thiserror::Error;

/* ------------------------------------------------------------------------- */
/* Public result alias                                                       */
/* ------------------------------------------------------------------------- */

pub type TriggerResult<T> = std::result::Result<T, TriggerError>;

/* ------------------------------------------------------------------------- */
/* Top-level error                                                           */
/* ------------------------------------------------------------------------- */

#[derive(Debug, Error)]
pub enum TriggerError {
    /// Invalid or incomplete trigger configuration (startup only).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A REST call against the review server failed.
    #[error(transparent)]
    Api(#[from] StashApiError),
}

/* ------------------------------------------------------------------------- */
/* Config errors                                                             */
/* ------------------------------------------------------------------------- */

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing or empty.
    #[error("[Build Trigger] missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A number failed to parse (intervals, timeouts).
    #[error("[Build Trigger] invalid number in {var}: {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    /// The job name cannot be turned into a marker pattern.
    #[error("[Build Trigger] job name {name:?} cannot be used in a marker pattern: {source}")]
    InvalidJobName {
        name: String,
        #[source]
        source: regex::Error,
    },

    /// A target-branch pattern does not compile.
    #[error("[Build Trigger] invalid target branch pattern {pattern:?}: {source}")]
    InvalidBranchPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/* ------------------------------------------------------------------------- */
/* Env helpers                                                               */
/* ------------------------------------------------------------------------- */

/// Fetches a required, non-empty environment variable.
pub fn must_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

/// Optional string; unset and empty both read as `None`.
pub fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// `1|true|yes|on` (any case) is true, any other set value is false.
pub fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Optional `u64`; set-but-invalid is an error rather than a silent default.
pub fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env_opt(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
            var: name,
            value: raw,
        }),
    }
}
