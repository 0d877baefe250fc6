//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
//! Client side of the HMI telemetry link.
//!
//! One background task ([`ReconnectSupervisor`]) keeps a TCP session to the
//! telemetry server alive for the lifetime of the process. Each session
//! reassembles frames, decodes them and hands them to the [`Dispatcher`],
//! which routes by the `device-sn` body field through the shared
//! [`DeviceRegistry`]. Outbound commands go through a [`LinkSender`] and are
//! dropped while disconnected.
//!
//! ```no_run
//! # async fn demo() {
//! use hmi_link_client::{DeviceRegistry, LinkConfig, LinkMetrics, ReconnectSupervisor};
//!
//! let registry = DeviceRegistry::new();
//! registry
//!     .subscribe("tank-1", |update: hmi_link_client::Notification| {
//!         println!("{} -> {}", update.device_id, update.body);
//!     })
//!     .expect("fresh identifier");
//! let link = ReconnectSupervisor::new(LinkConfig::default(), registry, LinkMetrics::default())
//!     .expect("default settings are valid")
//!     .spawn();
//! let _ = link.wait_connected(std::time::Duration::from_secs(5)).await;
//! # }
//! ```
#![warn(missing_docs)]

use std::fmt;
use std::io;

pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod registry;
pub mod sender;
pub mod session;
pub mod state;
pub mod supervisor;

/// Why a connection session ended. Every reason leads to a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum CloseReason {
    /// The TCP connect failed; the session never opened.
    #[error("connect failed: {0}")]
    ConnectRefused(#[source] io::Error),
    /// The server closed the connection in an orderly way.
    #[error("peer closed the connection")]
    PeerClosed,
    /// A read or write on the open connection failed.
    #[error("transport error: {0}")]
    Io(#[source] io::Error),
    /// A panic escaped the session, usually from a subscriber callback.
    #[error("session panicked: {0}")]
    Panicked(String),
}

impl CloseReason {
    /// Payload-free classification, suitable for status broadcasts.
    pub fn kind(&self) -> CloseKind {
        match self {
            CloseReason::ConnectRefused(_) => CloseKind::ConnectRefused,
            CloseReason::PeerClosed => CloseKind::PeerClosed,
            CloseReason::Io(_) => CloseKind::Io,
            CloseReason::Panicked(_) => CloseKind::Panicked,
        }
    }
}

/// Classification of [`CloseReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseKind {
    /// See [`CloseReason::ConnectRefused`].
    ConnectRefused,
    /// See [`CloseReason::PeerClosed`].
    PeerClosed,
    /// See [`CloseReason::Io`].
    Io,
    /// See [`CloseReason::Panicked`].
    Panicked,
}

impl fmt::Display for CloseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseKind::ConnectRefused => "connect_refused",
            CloseKind::PeerClosed => "peer_closed",
            CloseKind::Io => "io_error",
            CloseKind::Panicked => "panicked",
        };
        f.write_str(label)
    }
}

pub use config::{ConfigError, LinkConfig};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use metrics::{LinkCounters, LinkMetrics};
pub use registry::{
    ChannelSubscriber, DeliveryError, DeviceRegistry, Notification, RegistryError, Subscriber,
    SubscriberId,
};
pub use sender::{LinkSender, SendStatus};
pub use session::ConnectionSession;
pub use state::{ConnectionState, LinkStatus};
pub use supervisor::{LinkHandle, ReconnectSupervisor};

pub use hmi_link_msg::{DeviceControl, FanSpeed, MessageKind};
