//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub const ENV_MAX_INVALID_REPLIES: &str = "RELATE_MAX_INVALID_REPLIES";
pub const ENV_REPLY_TIMEOUT_SECS: &str = "RELATE_REPLY_TIMEOUT_SECS";
pub const ENV_TEST_PARTICIPANTS: &str = "RELATE_TEST_PARTICIPANTS";

/// Tunables for every session created from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Invalid replies tolerated per question before giving up. `None` retries forever.
    pub max_invalid_replies: Option<u32>,
    /// How long to wait for each reply. `None` waits forever.
    pub reply_timeout_secs: Option<u64>,
    /// Testing mode: synthetic participants registered into every new session
    pub test_participants: usize,
    /// Send completion and early-end notices to participants
    pub notify_participants: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_invalid_replies: None,
            reply_timeout_secs: None,
            test_participants: 0,
            notify_participants: true,
        }
    }
}

impl SessionConfig {
    /// Parse from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Defaults overlaid with the `RELATE_*` environment variables
    pub fn from_env() -> Result<Self, SessionError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SessionError> {
        if let Some(raw) = lookup(ENV_MAX_INVALID_REPLIES) {
            self.max_invalid_replies = Some(parse_var(ENV_MAX_INVALID_REPLIES, &raw)?);
        }
        if let Some(raw) = lookup(ENV_REPLY_TIMEOUT_SECS) {
            self.reply_timeout_secs = Some(parse_var(ENV_REPLY_TIMEOUT_SECS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_TEST_PARTICIPANTS) {
            self.test_participants = parse_var(ENV_TEST_PARTICIPANTS, &raw)?;
        }
        Ok(self)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, SessionError> {
    raw.trim()
        .parse()
        .map_err(|_| SessionError::Config(format!("{key}: invalid value {raw:?}")))
}
