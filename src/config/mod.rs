use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use crate::cli::Args;

/// How the periodic refresh folds the polled conversation list into the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// Keep a local summary that is newer than the polled one.
    Merge,
    /// Overwrite the local list wholesale.
    Replace,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseRefreshPolicyError {
    message: String,
}

impl fmt::Display for ParseRefreshPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseRefreshPolicyError {}

impl FromStr for RefreshPolicy {
    type Err = ParseRefreshPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "merge" => Ok(RefreshPolicy::Merge),
            "replace" => Ok(RefreshPolicy::Replace),
            _ =>
                Err(ParseRefreshPolicyError {
                    message: format!("Invalid refresh policy: '{}'", s),
                }),
        }
    }
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshPolicy::Merge => write!(f, "merge"),
            RefreshPolicy::Replace => write!(f, "replace"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectBackoff {
    /// Delay before reconnect `attempt` (1-based): `base * 2^(attempt-1)`, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(multiplier).min(max_ms))
    }
}

/// Engine-facing settings, built from the CLI/env `Args`.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub refresh_policy: RefreshPolicy,
    pub reconnect: ReconnectBackoff,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            refresh_policy: RefreshPolicy::Merge,
            reconnect: ReconnectBackoff::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_args(args: &Args) -> Result<Self, ParseRefreshPolicyError> {
        Ok(Self {
            poll_interval: Duration::from_secs(args.poll_interval_secs.max(1)),
            refresh_policy: args.refresh_policy.parse()?,
            reconnect: ReconnectBackoff {
                base: Duration::from_millis(args.reconnect_backoff_base_ms),
                max: Duration::from_millis(args.reconnect_backoff_max_ms),
            },
        })
    }
}
