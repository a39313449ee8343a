//! Configuration for session-core

use std::time::Duration;

use serde::Deserialize;

use crate::api::types::RECORDER_PARTICIPANT_PUBLIC_ID;
use crate::errors::{Result, SessionError};

/// Default upper bound for pipeline creation, in seconds
pub const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 30;

/// Default number of call-detail records kept in memory by [`crate::cdr::CdrRecorder`]
pub const DEFAULT_CDR_HISTORY_SIZE: usize = 1024;

const ENV_PIPELINE_TIMEOUT: &str = "MEDIAROUTE_PIPELINE_TIMEOUT_SECS";
const ENV_STATS_ENABLED: &str = "MEDIAROUTE_STATS_ENABLED";
const ENV_DESTROY_MEDIA_CLIENT: &str = "MEDIAROUTE_DESTROY_MEDIA_CLIENT";
const ENV_RECORDER_PUBLIC_ID: &str = "MEDIAROUTE_RECORDER_PUBLIC_ID";

/// Per-session configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on waiting for the media pipeline to be created
    pub pipeline_timeout_secs: u64,
    /// Enable latency stats on newly created pipelines
    pub stats_enabled: bool,
    /// Destroy the injected media client when the session closes
    pub destroy_media_client: bool,
    /// Public id excluded from call-detail records
    pub recorder_public_id: String,
    /// Records retained by the in-memory CDR recorder
    pub cdr_history_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pipeline_timeout_secs: DEFAULT_PIPELINE_TIMEOUT_SECS,
            stats_enabled: false,
            destroy_media_client: false,
            recorder_public_id: RECORDER_PARTICIPANT_PUBLIC_ID.to_string(),
            cdr_history_size: DEFAULT_CDR_HISTORY_SIZE,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(input)
            .map_err(|e| SessionError::config(format!("Invalid session configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `MEDIAROUTE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_PIPELINE_TIMEOUT) {
            config.pipeline_timeout_secs = value.trim().parse().map_err(|_| {
                SessionError::config(format!(
                    "{} must be an integer, got '{}'",
                    ENV_PIPELINE_TIMEOUT, value
                ))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_STATS_ENABLED) {
            config.stats_enabled = parse_bool(ENV_STATS_ENABLED, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_DESTROY_MEDIA_CLIENT) {
            config.destroy_media_client = parse_bool(ENV_DESTROY_MEDIA_CLIENT, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_RECORDER_PUBLIC_ID) {
            config.recorder_public_id = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_pipeline_timeout(mut self, timeout: Duration) -> Self {
        // Sub-second timeouts round up so a zero bound is never produced
        self.pipeline_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_stats_enabled(mut self, enabled: bool) -> Self {
        self.stats_enabled = enabled;
        self
    }

    pub fn with_destroy_media_client(mut self, destroy: bool) -> Self {
        self.destroy_media_client = destroy;
        self
    }

    pub fn with_recorder_public_id(mut self, public_id: impl Into<String>) -> Self {
        self.recorder_public_id = public_id.into();
        self
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline_timeout_secs == 0 {
            return Err(SessionError::config("pipeline_timeout_secs must be greater than zero"));
        }
        if self.recorder_public_id.is_empty() {
            return Err(SessionError::config("recorder_public_id must not be empty"));
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SessionError::config(format!("{} must be a boolean, got '{}'", name, other))),
    }
}
