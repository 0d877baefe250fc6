//! ---
//! hmi_section: "01-core-functionality"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Shared configuration and logging for the HMI link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use hmi_link_client::LinkConfig;
use hmi_link_msg::AGGREGATE_DEVICE_ID;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Configuration for the HMI link binaries.
///
/// ```toml
/// [link]
/// server = "127.0.0.1:47554"
/// retry_delay = 500
///
/// [logging]
/// format = "pretty"
///
/// [devices.tank-1]
/// kind = "water-level"
/// label = "Boiler feed tank"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Devices shown on the diagram, keyed by device identifier, in
    /// declaration order.
    #[serde(default)]
    pub devices: IndexMap<String, DeviceConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "HMI_LINK_CONFIG";

    /// Load configuration from disk, respecting the `HMI_LINK_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    ///
    /// Fails when neither the override nor any candidate exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        match Self::discover(candidates)? {
            Some(loaded) => Ok(loaded),
            None => Err(anyhow!(
                "no configuration files found. inspected: {}",
                candidates
                    .iter()
                    .map(|p| p.as_ref().display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    /// Like [`load_with_source`](Self::load_with_source), but falls back to
    /// defaults when no file exists. A file that exists and is invalid is
    /// still an error.
    pub fn load_or_default<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        Ok(Self::discover(candidates)?.unwrap_or_else(|| LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        }))
    }

    fn discover<P: AsRef<Path>>(candidates: &[P]) -> Result<Option<LoadedAppConfig>> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(Some(LoadedAppConfig {
                    config,
                    source: Some(path),
                }));
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(Some(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                }));
            }
        }
        Ok(None)
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Look up a configured device.
    pub fn device(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.get(device_id)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.link.validate()?;
        for device_id in self.devices.keys() {
            if device_id.trim().is_empty() {
                return Err(anyhow!("device identifiers must not be empty"));
            }
            if device_id == AGGREGATE_DEVICE_ID {
                return Err(anyhow!(
                    "'{AGGREGATE_DEVICE_ID}' is reserved for aggregate statistics and cannot name a device"
                ));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// What a configured device reports, which decides how its telemetry is read.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Water level sensor (`water-amount`, a 0..1 fraction).
    WaterLevel,
    /// Temperature and humidity meter (`temperature`, `humidity`).
    TempMeter,
    /// Anemometer (`flow-rate`).
    WindMeter,
    /// Pipe flow meter (`flow-rate`, `water-pressure`).
    WaterMeter,
    /// Flue gas sensor (`CO`, `HCl`, `SO2`).
    GasSensor,
    /// Fan or pump accepting `set-wind-pump-speed` commands.
    Fan,
    #[default]
    Generic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub kind: DeviceKind,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file. No file is written when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
