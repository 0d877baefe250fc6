//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "binary"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Binary entrypoint for the HMI link console."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hmi_link_client::{
    ChannelSubscriber, DeviceControl, DeviceRegistry, FanSpeed, LinkCounters, LinkHandle,
    LinkMetrics, Notification, ReconnectSupervisor, RegistryError, SendStatus,
};
use hmi_link_common::{init_tracing, AppConfig, DeviceKind, LogFormat};
use hmi_link_msg::{
    AggregateStats, GasReading, TemperatureReading, WaterFlow, WaterLevel, WindSpeed,
};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "configs/hmi-link.toml";
const WATCH_QUEUE: usize = 256;
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(author, version, about = "HMI telemetry link console", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the telemetry server address")]
    server: Option<SocketAddr>,

    #[arg(long, value_enum, help = "Override the console log format")]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Json => LogFormat::StructuredJson,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Log telemetry for configured and listed devices until Ctrl-C")]
    Watch {
        #[arg(long = "device", value_name = "ID", help = "Extra device to watch (repeatable)")]
        devices: Vec<String>,
    },
    #[command(about = "Set the speed of a fan or pump")]
    Control {
        #[arg(long, value_name = "ID")]
        device: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
        fan_speed: u8,
        #[arg(long, default_value_t = 5000, help = "How long to wait for a connection")]
        wait_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => AppConfig::load_with_source(std::slice::from_ref(path))?,
        None => AppConfig::load_or_default(&[DEFAULT_CONFIG_PATH])?,
    };
    let mut config = loaded.config;
    if let Some(server) = cli.server {
        config.link.server = server;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    init_tracing("hmi-linkctl", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    let metrics_registry = prometheus::Registry::new();
    let metrics = LinkMetrics::register(&metrics_registry)?;

    match cli.command {
        Commands::Watch { devices } => watch(config, metrics, devices).await,
        Commands::Control {
            device,
            fan_speed,
            wait_ms,
        } => {
            let speed = FanSpeed::try_from(fan_speed)?;
            control(config, metrics, device, speed, Duration::from_millis(wait_ms)).await
        }
    }
}

async fn watch(config: AppConfig, metrics: LinkMetrics, extra: Vec<String>) -> Result<()> {
    let registry = DeviceRegistry::new();
    let (tx, mut rx) = mpsc::channel(WATCH_QUEUE);
    for device_id in config.devices.keys().chain(extra.iter()) {
        match registry.subscribe(device_id.as_str(), ChannelSubscriber::from_sender(tx.clone())) {
            Ok(_) | Err(RegistryError::Duplicate(_)) => {}
            Err(err) => warn!(device = %device_id, error = %err, "device not watched"),
        }
    }
    registry.set_aggregate(ChannelSubscriber::from_sender(tx));
    info!(devices = ?registry.device_ids(), server = %config.link.server, "watching telemetry");

    let link = ReconnectSupervisor::new(config.link.clone(), registry, metrics)?.spawn();
    let mut snapshots = tokio::time::interval(SNAPSHOT_INTERVAL);
    snapshots.tick().await;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("shutdown requested");
                break;
            }
            Some(notification) = rx.recv() => log_notification(&config, &notification),
            _ = snapshots.tick() => log_counters(&link.metrics().snapshot()),
        }
    }

    log_counters(&link.metrics().snapshot());
    link.abort().await;
    Ok(())
}

async fn control(
    config: AppConfig,
    metrics: LinkMetrics,
    device: String,
    speed: FanSpeed,
    wait: Duration,
) -> Result<()> {
    if let Some(device_config) = config.device(&device) {
        if device_config.kind != DeviceKind::Fan {
            warn!(device = %device, kind = ?device_config.kind, "device is not configured as a fan");
        }
    }

    let link =
        ReconnectSupervisor::new(config.link.clone(), DeviceRegistry::new(), metrics)?.spawn();
    let result = send_when_connected(&link, &DeviceControl::set_fan_speed(device.as_str(), speed), wait).await;
    link.abort().await;

    match result? {
        SendStatus::Queued => {
            info!(device = %device, speed = %speed, "fan speed command sent");
            Ok(())
        }
        status => {
            error!(device = %device, server = %config.link.server, ?status, "not connected");
            anyhow::bail!("not connected to {}", config.link.server)
        }
    }
}

async fn send_when_connected(
    link: &LinkHandle,
    command: &DeviceControl,
    wait: Duration,
) -> Result<SendStatus> {
    if !link.wait_connected(wait).await {
        return Ok(SendStatus::Disconnected);
    }
    let status = link.sender().send_control(command)?;
    if status == SendStatus::Queued {
        // Give the session a moment to flush before the task is aborted.
        let deadline = tokio::time::Instant::now() + wait;
        while link.metrics().snapshot().messages_sent == 0
            && link.is_connected()
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    Ok(status)
}

fn log_counters(counters: &LinkCounters) {
    info!(
        connected = counters.connected,
        sessions = counters.sessions,
        frames_received = counters.frames_received,
        frames_discarded = counters.frames_discarded,
        messages_dropped = counters.messages_dropped,
        messages_sent = counters.messages_sent,
        "link counters"
    );
}

fn log_notification(config: &AppConfig, notification: &Notification) {
    let device = notification.device_id.as_str();
    info!(device, sequence = %notification.sequence, "{}", describe(config, notification));
}

/// Human-readable summary of a notification, using the typed payload for the
/// configured device kind when the body matches it.
fn describe(config: &AppConfig, notification: &Notification) -> String {
    if notification.is_aggregate() {
        if let Ok(stats) = notification.parse::<AggregateStats>() {
            return format!(
                "stats: coal-1 {:?}, coal-2 {:?}, water used {:?}, energy used {:?}",
                stats.coal_1, stats.coal_2, stats.water_used, stats.energy_used
            );
        }
    }
    let kind = config
        .device(&notification.device_id)
        .map(|d| d.kind)
        .unwrap_or_default();
    let typed = match kind {
        DeviceKind::WaterLevel => notification
            .parse::<WaterLevel>()
            .ok()
            .map(|level| format!("water level {:.1}%", level.percent())),
        DeviceKind::TempMeter => notification
            .parse::<TemperatureReading>()
            .ok()
            .map(|t| format!("temperature {} humidity {}", t.temperature, t.humidity)),
        DeviceKind::WindMeter => notification
            .parse::<WindSpeed>()
            .ok()
            .map(|wind| format!("wind speed {}", wind.flow_rate)),
        DeviceKind::WaterMeter => notification
            .parse::<WaterFlow>()
            .ok()
            .map(|flow| format!("flow {} pressure {}", flow.flow_rate, flow.water_pressure)),
        DeviceKind::GasSensor => notification
            .parse::<GasReading>()
            .ok()
            .map(|gas| format!("gas CO {} HCl {} SO2 {}", gas.co, gas.hcl, gas.so2)),
        DeviceKind::Fan | DeviceKind::Generic => None,
    };
    typed.unwrap_or_else(|| notification.body.to_string())
}
