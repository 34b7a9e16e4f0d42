//! Federation configuration.
//!
//! A single value constructed once and handed to the coordination layer and
//! the delivery scheduler. Durations are written as milliseconds when the
//! config is loaded from a document.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FederationError;

/// Timeouts and policies for one federation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// How long a reliable broadcast waits for every member to acknowledge.
    #[serde(with = "millis")]
    pub response_timeout: Duration,

    /// How long connect waits for a coordinator before self-appointing.
    #[serde(with = "millis")]
    pub discovery_timeout: Duration,

    /// How long the transport may take to admit a new member.
    #[serde(with = "millis")]
    pub join_timeout: Duration,

    /// Reject duplicate federate names instead of suffixing them.
    pub unique_federate_names: bool,

    /// First-message wait used by the plain `tick()`.
    #[serde(with = "millis")]
    pub tick_timeout: Duration,

    /// Back-off of the immediate delivery loop while callbacks are disabled.
    #[serde(with = "millis")]
    pub immediate_idle_sleep: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(1000),
            discovery_timeout: Duration::from_millis(1000),
            join_timeout: Duration::from_millis(5000),
            unique_federate_names: true,
            tick_timeout: Duration::from_millis(1),
            immediate_idle_sleep: Duration::from_millis(500),
        }
    }
}

impl FederationConfig {
    /// Override the acknowledgement timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Override the coordinator discovery wait.
    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Override how long the transport may take to admit us.
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Choose between rejecting and suffixing duplicate names.
    #[must_use]
    pub fn with_unique_federate_names(mut self, unique: bool) -> Self {
        self.unique_federate_names = unique;
        self
    }

    /// Override the plain tick wait.
    #[must_use]
    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    /// Override the idle back-off of the immediate delivery loop.
    #[must_use]
    pub fn with_immediate_idle_sleep(mut self, sleep: Duration) -> Self {
        self.immediate_idle_sleep = sleep;
        self
    }

    /// Reject configurations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), FederationError> {
        let required = [
            ("response_timeout", self.response_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("join_timeout", self.join_timeout),
            ("immediate_idle_sleep", self.immediate_idle_sleep),
        ];

        for (name, value) in required {
            if value.is_zero() {
                return Err(FederationError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
