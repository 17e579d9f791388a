//! Runtime tunables for the relay.
//!
//! Defaults mirror the timings the relay was designed around: a 60 second
//! liveness window, pings at 9/10 of that window, a 10 second write deadline
//! and 512 byte inbound frames.

use shared::{DEFAULT_PORT, MAX_MESSAGE_SIZE};
use std::time::Duration;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
pub const DEFAULT_HUB_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("ping period {ping:?} must be shorter than pong wait {pong:?}")]
    PingAfterDeadline { ping: Duration, pong: Duration },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on any single write (data, ping or close) to a peer
    pub write_wait: Duration,
    /// How long a connection may stay silent before it is considered dead
    pub pong_wait: Duration,
    /// Interval between liveness pings, strictly less than `pong_wait`
    pub ping_period: Duration,
    /// Largest inbound frame accepted from a peer, in bytes
    pub max_message_size: usize,
    /// Outbound messages buffered per connection before it is dropped
    pub mailbox_capacity: usize,
    /// Depth of each of the hub's three input queues
    pub hub_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: ping_period_for(DEFAULT_PONG_WAIT),
            max_message_size: MAX_MESSAGE_SIZE,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            hub_queue_capacity: DEFAULT_HUB_QUEUE_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Sets the liveness window and derives the ping period from it.
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = ping_period_for(pong_wait);
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pong_wait.is_zero() {
            return Err(ConfigError::Zero("pong wait"));
        }
        if self.write_wait.is_zero() {
            return Err(ConfigError::Zero("write wait"));
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(ConfigError::PingAfterDeadline {
                ping: self.ping_period,
                pong: self.pong_wait,
            });
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Zero("max message size"));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Zero("mailbox capacity"));
        }
        if self.hub_queue_capacity == 0 {
            return Err(ConfigError::Zero("hub queue capacity"));
        }
        Ok(())
    }
}

fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}
