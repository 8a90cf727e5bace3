use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bleota_core::device::{DeviceHandle, select_first};
use bleota_core::error::UpdateError;
use bleota_core::events::{LogLevel, UpdateEvent, UpdateObserver};
use bleota_core::session::{SessionConfig, UpdateSession};
use bleota_core::session_log::{SessionLog, log_path_for};
use bleota_core::transport::BtleplugTransport;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "bleota.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "BLE firmware update tool", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List nearby devices advertising the update service name
    Scan {
        /// Advertised-name fragment to match
        #[arg(long)]
        filter: Option<String>,

        /// Scan duration in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Push a firmware image to a device
    Update {
        /// Path to firmware binary
        firmware: Option<PathBuf>,

        /// Device address; skips discovery
        #[arg(short, long)]
        address: Option<String>,

        /// Advertised-name fragment used when scanning
        #[arg(long)]
        filter: Option<String>,

        /// Maximum bytes per data write
        #[arg(long)]
        packet_size: Option<usize>,

        /// Pause after each packet in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Do not save the operation log beside the firmware
        #[arg(long)]
        no_log: bool,
    },
    /// Write a default config file
    Config {
        /// Output path
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Scan { filter, timeout } => {
            if let Some(filter) = filter {
                config.device_name_filter = filter;
            }
            if let Some(timeout) = timeout {
                config.scan_timeout_secs = timeout;
            }
            scan(&config)
        }
        Command::Update {
            firmware,
            address,
            filter,
            packet_size,
            delay_ms,
            no_log,
        } => {
            if firmware.is_some() {
                config.firmware_path = firmware;
            }
            if address.is_some() {
                config.device_address = address;
            }
            if let Some(filter) = filter {
                config.device_name_filter = filter;
            }
            if let Some(size) = packet_size {
                config.packet_size = size;
            }
            if let Some(delay) = delay_ms {
                config.inter_packet_delay_ms = delay;
            }
            if no_log {
                config.save_log = false;
            }
            update(config)
        }
        Command::Config { output, force } => {
            if output.exists() && !force {
                anyhow::bail!("{} already exists (use --force)", output.display());
            }
            config.save_to_file(&output)?;
            info!(path = %output.display(), "Config written");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("failed to read config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            SessionConfig::load_from_file(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("failed to read config {DEFAULT_CONFIG_PATH}"))
        }
        None => Ok(SessionConfig::default()),
    }
}

fn open_transport(config: &SessionConfig) -> Result<BtleplugTransport> {
    Ok(BtleplugTransport::open()?
        .with_service(config.characteristics.service)
        .with_connect_timeout(config.connect_timeout()))
}

fn scan(config: &SessionConfig) -> Result<()> {
    let transport = open_transport(config)?;
    info!(
        filter = %config.device_name_filter,
        secs = config.scan_timeout_secs,
        "Scanning for devices..."
    );
    let found = transport
        .discover(&config.device_filter(), config.scan_timeout())
        .map_err(UpdateError::Scan)?;

    if found.is_empty() {
        warn!("No matching devices found");
    }
    for device in found {
        println!("{}\t{}", device.address, device.name);
    }
    Ok(())
}

fn note(log: &SessionLog, message: impl Into<String>) {
    log.on_event(&UpdateEvent::Log {
        level: LogLevel::Info,
        message: message.into(),
    });
}

fn update(config: SessionConfig) -> Result<()> {
    let firmware = config
        .firmware_path
        .clone()
        .context("no firmware path given (argument or config)")?;
    config.validate()?;
    let log = Arc::new(SessionLog::new());
    let transport = open_transport(&config)?;

    let device = match &config.device_address {
        Some(address) => DeviceHandle::new("", address.clone()),
        None => {
            note(&log, "Scanning for devices...");
            let found = transport
                .discover(&config.device_filter(), config.scan_timeout())
                .map_err(UpdateError::Scan)?;
            let device = select_first(found, &config.device_filter())?;
            note(&log, format!("Found device: {} - {}", device.name, device.address));
            device
        }
    };

    let save_log = config.save_log;
    let session =
        UpdateSession::with_observer(config, transport, device, firmware.clone(), log.clone());
    let report = session.run();

    info!(
        status = %report.status,
        packets = %format!("{}/{}", report.packets_sent, report.total_packets),
        acks_ok = report.acks.ok,
        acks_error = report.acks.error,
        elapsed = ?round_ms(report.elapsed),
        "Update finished"
    );

    if save_log {
        let path = log_path_for(&firmware, report.started_at);
        match log.flush_to_file(&path) {
            Ok(()) => info!(path = %path.display(), "Log saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save log"),
        }
    }

    report.into_result()?;
    Ok(())
}

fn round_ms(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
