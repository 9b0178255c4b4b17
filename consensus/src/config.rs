//! Consensus manager configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the [`crate::manager::ConsensusManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Round-change timeout `T_round` — how long the manager waits for
    /// progress before advancing the round.
    #[serde(with = "humantime_serde")]
    pub round_change_timeout: Duration,

    /// Additive backoff applied to `round_change_timeout` per round.
    #[serde(with = "humantime_serde")]
    pub timeout_delta: Duration,

    /// Rounds attempted for a height before the node gives up and logs a
    /// liveness warning (the protocol itself has no hard round ceiling).
    pub max_rounds: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            round_change_timeout: Duration::from_secs(3),
            timeout_delta: Duration::from_millis(500),
            max_rounds: 100,
        }
    }
}

impl ConsensusConfig {
    /// Round-change timeout for a specific round (exponential-ish backoff,
    /// carried over from the teacher's `*_timeout_for_round` convention).
    pub fn round_change_timeout_for_round(&self, round: u64) -> Duration {
        self.round_change_timeout + self.timeout_delta * round as u32
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
