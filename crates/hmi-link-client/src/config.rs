//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use hmi_link_msg::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// Port the telemetry server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 47554;

fn default_server() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_SERVER_PORT))
}

fn default_read_chunk() -> usize {
    1024
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_outbound_capacity() -> usize {
    64
}

/// Settings for the telemetry link.
///
/// `retry_delay` defaults to zero: a refused or dropped connection is retried
/// immediately, which spins against a server that is down. Set a delay for
/// deployments where that matters.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Telemetry server address.
    #[serde(default = "default_server")]
    pub server: SocketAddr,
    /// Size of each socket read.
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Optional read timeout. An elapsed timeout just retries the read.
    #[serde(default)]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub read_timeout: Option<Duration>,
    /// Pause between the end of one session and the next connect attempt.
    #[serde(default)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,
    /// Largest accepted frame payload, in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Frames that may wait for the socket before `send` reports backpressure.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            read_chunk: default_read_chunk(),
            read_timeout: None,
            retry_delay: Duration::ZERO,
            max_frame_len: default_max_frame_len(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl LinkConfig {
    /// Default settings pointed at another server.
    pub fn with_server(server: SocketAddr) -> Self {
        Self {
            server,
            ..Self::default()
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("read_chunk", self.read_chunk),
            ("max_frame_len", self.max_frame_len),
            ("outbound_capacity", self.outbound_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(())
    }
}

/// Invalid [`LinkConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A size that must be positive is zero.
    #[error("link.{field} must be greater than zero")]
    Zero {
        /// Offending field.
        field: &'static str,
    },
}
