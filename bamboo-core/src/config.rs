//! Runtime tunables.
//!
//! Gathers the constants the protocol leaves implicit (default ACK wait,
//! discovery interval, protocol version, default advertised caps) into one
//! `Default` + named-preset struct, the same shape as a buffer-sizing config.

/// Default ACK wait, in seconds, when a request carries no `ttl_ms`.
pub const DEFAULT_ACK_WAIT_SECS: f64 = 8.0;

/// Default discovery announce interval, in seconds.
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 5;

/// Minimum discovery announce interval, in seconds.
pub const MIN_DISCOVERY_INTERVAL_SECS: u64 = 1;

/// Current wire protocol revision stamped into every envelope.
pub const PROTOCOL_VERSION: u64 = 1;

/// Runtime-wide configuration.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Seconds to wait for ACK when a request carries no `ttl_ms` override.
    pub default_ack_wait_secs: f64,
    /// Seconds between discovery HELLO broadcasts.
    pub discovery_interval_secs: u64,
    /// Protocol revision stamped into `Envelope::version`.
    pub protocol_version: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_ack_wait_secs: DEFAULT_ACK_WAIT_SECS,
            discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL_SECS,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl RuntimeConfig {
    /// Configuration for fast local tests: short ACK wait, frequent discovery.
    #[must_use]
    pub const fn fast_test() -> Self {
        Self {
            default_ack_wait_secs: 0.2,
            discovery_interval_secs: MIN_DISCOVERY_INTERVAL_SECS,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Custom configuration, clamping the discovery interval to its floor.
    #[must_use]
    pub fn custom(default_ack_wait_secs: f64, discovery_interval_secs: u64, protocol_version: u64) -> Self {
        Self {
            default_ack_wait_secs,
            discovery_interval_secs: discovery_interval_secs.max(MIN_DISCOVERY_INTERVAL_SECS),
            protocol_version,
        }
    }
}
