//! Agent configuration.
//!
//! Configuration for a reliable socket agent, including:
//! - Heartbeat interval and payload
//! - Reconnect strategy (fixed, exponential, or a custom function)
//! - Outbound buffer capacity and eviction policy
//!
//! Durations are stored as whole milliseconds so that configuration files
//! stay readable.

use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::EvictionPolicy;
use crate::error::{TetherError, TetherResult};
use crate::socket::Payload;

/// Largest accepted buffer capacity. Buffer slots are allocated up front.
pub const MAX_BUFFER_CAPACITY: usize = 1 << 20;

/// Function from attempt count to reconnect delay.
pub type BackoffFn = Rc<dyn Fn(u32) -> Duration>;

/// How long to wait before the next connection attempt.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// The same delay every time.
    Fixed {
        /// Delay in milliseconds.
        interval_ms: u64,
    },
    /// `initial_ms * multiplier^(attempts - 1)`, capped at `max_ms`.
    Exponential {
        /// Delay for the first attempt, in milliseconds.
        initial_ms: u64,
        /// Upper bound on the delay, in milliseconds.
        max_ms: u64,
        /// Growth factor per attempt.
        multiplier: f64,
    },
    /// Any function of the attempt count. Cannot be loaded from a file.
    #[serde(skip)]
    Custom(BackoffFn),
}

impl ReconnectPolicy {
    /// A fixed delay.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self::Fixed {
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// A custom delay function of the attempt count.
    pub fn custom<F>(backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + 'static,
    {
        Self::Custom(Rc::new(backoff))
    }

    /// Delay to wait given `attempts` consecutive failures so far.
    ///
    /// Evaluated fresh at every scheduling decision.
    #[must_use]
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        match self {
            Self::Fixed { interval_ms } => Duration::from_millis(*interval_ms),
            Self::Exponential {
                initial_ms,
                max_ms,
                multiplier,
            } => {
                let factor = multiplier.powi(attempts.saturating_sub(1) as i32);
                let delay_ms = (*initial_ms as f64 * factor).min(*max_ms as f64);
                Duration::from_millis(delay_ms as u64)
            }
            Self::Custom(backoff) => backoff(attempts),
        }
    }

    fn validate(&self) -> TetherResult<()> {
        if let Self::Exponential {
            initial_ms,
            max_ms,
            multiplier,
        } = self
        {
            if *initial_ms == 0 {
                return Err(TetherError::Config(
                    "reconnect.initial_ms must be greater than 0".to_string(),
                ));
            }
            if max_ms < initial_ms {
                return Err(TetherError::Config(
                    "reconnect.max_ms cannot be less than reconnect.initial_ms".to_string(),
                ));
            }
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(TetherError::Config(format!(
                    "reconnect.multiplier must be a finite number >= 1.0, got {multiplier}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed { interval_ms: 5_000 }
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed { interval_ms } => f
                .debug_struct("Fixed")
                .field("interval_ms", interval_ms)
                .finish(),
            Self::Exponential {
                initial_ms,
                max_ms,
                multiplier,
            } => f
                .debug_struct("Exponential")
                .field("initial_ms", initial_ms)
                .field("max_ms", max_ms)
                .field("multiplier", multiplier)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Main agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Heartbeat period in milliseconds; 0 disables heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Payload sent on every heartbeat.
    pub heartbeat_payload: Payload,
    /// Number of outbound messages retained while disconnected.
    pub buffer_capacity: usize,
    /// What a full buffer does with a new message.
    pub eviction: EvictionPolicy,
    /// Reconnect strategy.
    pub reconnect: ReconnectPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            heartbeat_payload: Payload::from("ping"),
            reconnect: ReconnectPolicy::default(),
            buffer_capacity: 20,
            eviction: EvictionPolicy::EvictOldest,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> TetherResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TetherError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> TetherResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TetherError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error for a custom reconnect function, which has no
    /// file representation.
    pub fn to_toml(&self) -> TetherResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("cannot serialize config: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> TetherResult<()> {
        if self.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(TetherError::Config(format!(
                "buffer_capacity cannot exceed {MAX_BUFFER_CAPACITY}"
            )));
        }

        self.reconnect.validate()
    }

    /// Heartbeat period, `None` when heartbeats are disabled.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Set the heartbeat period.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, payload: impl Into<Payload>) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self.heartbeat_payload = payload.into();
        self
    }

    /// Disable heartbeats.
    #[must_use]
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat_interval_ms = 0;
        self
    }

    /// Set the reconnect strategy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the outbound buffer shape.
    #[must_use]
    pub fn with_buffer(mut self, capacity: usize, eviction: EvictionPolicy) -> Self {
        self.buffer_capacity = capacity;
        self.eviction = eviction;
        self
    }
}
