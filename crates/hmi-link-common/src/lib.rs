//! ---
//! hmi_section: "01-core-functionality"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Shared configuration and logging for the HMI link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
//! Configuration loading and tracing setup shared by the HMI link binaries.

pub mod config;
pub mod logging;

pub use config::{AppConfig, DeviceConfig, DeviceKind, LoadedAppConfig, LoggingConfig};
pub use hmi_link_client::LinkConfig;
pub use logging::{init_tracing, LogFormat};
