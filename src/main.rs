use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use aquagate::config::Config;
use aquagate::gateway::Gateway;
use aquagate::logging;
use aquagate::mqtt::{qos_from_level, MqttClient, Publisher};
use aquagate::netinfo;
use aquagate::telemetry::SimulatedSensors;

#[derive(Parser, Debug)]
#[command(name = "aquagate")]
#[command(version)]
#[command(about = "aquagate - publishes water-treatment telemetry and unit status to MQTT", long_about = None)]
struct Args {
    /// Path to configuration file (default: ./config.toml or ~/.config/aquagate/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Client ID (overrides config)
    #[arg(long)]
    client_id: Option<String>,

    /// Store code used in topics (overrides config)
    #[arg(short, long)]
    store_code: Option<String>,

    /// Device id; repeat to publish for several devices (replaces configured list)
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Seconds between publish cycles (overrides config)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Stop after this many publish cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Address reported in payloads (default: detected from the route to the broker)
    #[arg(long)]
    gateway_ip: Option<String>,

    /// Write a config file with default values to the config path and exit
    #[arg(long)]
    init: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.mqtt.host = host.clone();
        }
        if let Some(port) = self.port {
            config.mqtt.port = port;
        }
        if let Some(client_id) = &self.client_id {
            config.mqtt.client_id = client_id.clone();
        }
        if let Some(store_code) = &self.store_code {
            config.gateway.store_code = store_code.clone();
        }
        if !self.devices.is_empty() {
            config.gateway.devices = self.devices.clone();
        }
        if let Some(interval) = self.interval {
            config.gateway.publish_interval_secs = interval;
        }
        if let Some(cycles) = self.cycles {
            config.gateway.max_cycles = Some(cycles);
        }
        if let Some(ip) = &self.gateway_ip {
            config.gateway.gateway_ip = Some(ip.clone());
        }
    }
}

fn load_config(path: &Path, explicit: bool) -> Result<Config> {
    if path.exists() {
        return Config::load(path);
    }
    if explicit {
        bail!("Config file not found: {:?}", path);
    }
    info!("No config file at {:?}, using built-in defaults", path);
    Ok(Config::default())
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Refusing to overwrite existing config file: {:?}", path);
    }
    Config::default().save_to(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.debug, args.log_file.as_deref())?;

    let config_path = Config::find_config_path(args.config.as_deref());

    if args.init {
        return init_config(&config_path);
    }

    let mut config = load_config(&config_path, args.config.is_some())?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("Starting aquagate");
    info!("Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    info!("Store code: {}", config.gateway.store_code);
    info!("Devices: {}", config.gateway.devices.join(", "));
    info!("Interval: {} seconds", config.gateway.publish_interval_secs);

    let gateway_ip = netinfo::resolve_gateway_ip(&config);
    info!("Gateway address: {}", gateway_ip);

    let client = Arc::new(
        MqttClient::connect(&config.mqtt).context("Failed to create MQTT client")?,
    );
    let publisher = Publisher::new(Arc::clone(&client), qos_from_level(config.mqtt.qos));
    let shutdown_timeout = config.gateway.shutdown_timeout();

    let mut gateway = Gateway::new(
        config.gateway,
        gateway_ip,
        publisher,
        SimulatedSensors::new(),
    );
    let summary = gateway.run(shutdown_signal()).await;

    client.close(shutdown_timeout).await;

    let health = client.health().await;
    info!(
        "Published {} telemetry messages ({} rejected) over {} cycles",
        summary.telemetry.accepted, summary.telemetry.rejected, summary.cycles
    );
    info!(
        "Status messages: {} accepted, {} rejected",
        summary.status.accepted, summary.status.rejected
    );
    info!(
        "Connections: {}, reconnects: {}, pending failures: {}",
        health.connections, health.reconnects, health.consecutive_failures
    );
    if let Some(err) = client.last_error().await {
        info!("Last connection error: {}", err);
    }
    info!("aquagate exiting");
    Ok(())
}

/// Resolves on SIGINT (Ctrl-C) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
