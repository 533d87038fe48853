//! Daemon settings.
//!
//! Required inputs resolve flag-first with environment fallback. A missing
//! port or state source is a fatal configuration error, reported before any
//! socket is bound.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Environment fallback for the listening port.
pub const ENV_PORT: &str = "ROTOR_PORT";
/// Environment fallback for the state file path.
pub const ENV_STATE_FILE: &str = "ROTOR_STATE_FILE";

/// Fatal startup configuration failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no listening port configured: pass --port or set ROTOR_PORT")]
    MissingPort,

    #[error("listening port {value:?} is not a port number")]
    InvalidPort { value: String },

    #[error("no state source configured: pass --state-file or set ROTOR_STATE_FILE")]
    MissingStateFile,
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Port the gateway listens on.
    pub port: u16,
    /// JSON document polled for desired-state snapshots.
    pub state_file: PathBuf,
    /// State file poll interval.
    pub poll_interval: Duration,
}

impl Settings {
    /// Resolve settings from flags, falling back to the environment.
    pub fn resolve(
        port: Option<u16>,
        state_file: Option<PathBuf>,
        poll_interval_ms: u64,
    ) -> Result<Self, ConfigError> {
        Self::resolve_with(port, state_file, poll_interval_ms, |name| {
            std::env::var(name).ok()
        })
    }

    fn resolve_with(
        port: Option<u16>,
        state_file: Option<PathBuf>,
        poll_interval_ms: u64,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let port = match port {
            Some(port) => port,
            None => match env(ENV_PORT).filter(|value| !value.trim().is_empty()) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort { value })?,
                None => return Err(ConfigError::MissingPort),
            },
        };

        let state_file = match state_file {
            Some(path) => path,
            None => env(ENV_STATE_FILE)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .ok_or(ConfigError::MissingStateFile)?,
        };

        Ok(Self {
            port,
            state_file,
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }
}
