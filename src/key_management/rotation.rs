//! Key rotation policy and its outcome.
//!
//! A key expires once it is strictly older than the retention window; a key
//! exactly at the window's edge is kept.

use crate::config::{KmsConfig, DEFAULT_RETENTION_DAYS};

use super::key_id::KeyId;

const SECS_PER_DAY: i64 = 24 * 3600;

/// How long keys are retained before rotation removes them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    retention_secs: i64,
}

impl RotationPolicy {
    /// Creates a policy retaining keys for `retention_days` days
    pub fn new(retention_days: u32) -> Self {
        Self {
            retention_secs: i64::from(retention_days) * SECS_PER_DAY,
        }
    }

    pub fn from_secs(retention_secs: i64) -> Self {
        Self { retention_secs }
    }

    pub fn retention_secs(&self) -> i64 {
        self.retention_secs
    }

    /// Whether a key created at `created` is past retention at `now`.
    /// Keys dated in the future never expire.
    pub fn is_expired(&self, created: i64, now: i64) -> bool {
        now.saturating_sub(created) > self.retention_secs
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}

impl From<&KmsConfig> for RotationPolicy {
    fn from(config: &KmsConfig) -> Self {
        Self::from_secs(config.retention_secs())
    }
}

/// What a rotation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Keys removed for being past retention
    pub pruned: Vec<KeyId>,
    /// Keys kept because their identifier carries no creation time
    pub skipped: Vec<KeyId>,
    /// The freshly minted replacement key
    pub replacement: KeyId,
}
