//! Command line tool for trap trigger devices
//!
//! Fires the relay, pushes firmware updates and lists nearby devices over BLE.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reptrap_ble_controller::{
    BtleCentral, CancelHandle, Controller, ControllerConfig, FileFirmwareSource, FirmwareSource,
    HttpFirmwareSource, PeripheralIdentity, UpdateStage, ble, reptrap_home,
};
use reptrap_proto::CharacteristicRole;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reptrap-ble")]
#[command(about = "Trigger and update trap trigger devices over BLE")]
struct Cli {
    /// Device address (or CoreBluetooth UUID on macOS) to connect to
    #[arg(long, global = true, conflicts_with = "scan")]
    device: Option<String>,
    /// Connect to the first device advertising the trap service
    #[arg(long, global = true)]
    scan: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby BLE devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Fire the relay once
    Trigger,
    /// Push a new firmware image to the device
    Update {
        /// Local firmware image instead of the release download
        #[arg(short, long, conflicts_with = "url")]
        file: Option<PathBuf>,
        /// Download the image from this URL
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Connect and report what the device exposes
    Status,
    /// Write a 16-bit configuration value
    ConfigValue { value: u16 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reptrap_ble_controller=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::Scan { duration } = cli.command {
        return scan_devices(duration).await;
    }

    let mut config = ControllerConfig::load_or_create(&reptrap_home())?;
    if let Some(device) = cli.device {
        config.identity = PeripheralIdentity::fixed(device);
    } else if cli.scan {
        config.identity = PeripheralIdentity::discover();
    }
    config.validate()?;

    let central = BtleCentral::default_adapter().await?;
    let mut controller = Controller::new(central, &config);

    println!("Connecting to {}...", config.identity);
    controller.connect().await?;
    println!("Status: {}", controller.status().current());

    let result = match cli.command {
        Commands::Scan { .. } => Ok(()),
        Commands::Trigger => controller.trigger().await.map(|()| println!("Trigger sent!")),
        Commands::Update { file, url } => {
            let source: Box<dyn FirmwareSource> = match (file, url) {
                (Some(file), _) => Box::new(FileFirmwareSource::new(file)),
                (None, Some(url)) => Box::new(HttpFirmwareSource::new(url)),
                (None, None) => Box::new(controller.default_source()),
            };
            update_device(&controller, source.as_ref()).await
        }
        Commands::Status => {
            print_status(&controller);
            Ok(())
        }
        Commands::ConfigValue { value } => controller
            .send_config(value)
            .await
            .map(|()| println!("Config value {value} sent")),
    };

    controller.disconnect().await;
    Ok(result?)
}

async fn scan_devices(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for devices ({duration} seconds)...");

    let adapter = ble::get_adapter().await?;
    let devices = ble::scan(&adapter, Duration::from_secs(duration)).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_trap { " [TRAP]" } else { "" };
        println!(
            "  {} ({}, id {}) RSSI: {}{}",
            device.name, device.address, device.id, rssi, marker
        );
    }
    Ok(())
}

async fn update_device(
    controller: &Controller<BtleCentral>,
    source: &dyn FirmwareSource,
) -> Result<(), reptrap_ble_controller::Error> {
    let cancel = CancelHandle::new();
    let on_ctrl_c = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current chunk...");
            on_ctrl_c.cancel();
        }
    });

    println!("Updating firmware from {}", source.describe());
    let mut last_percent = None;
    let result = controller
        .update_firmware(source, cancel, |stage| match stage {
            UpdateStage::Streaming { sent, total } => {
                let percent = sent * 100 / (*total).max(1);
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    println!("{}", stage.message());
                }
            }
            other => println!("{}", other.message()),
        })
        .await;
    watcher.abort();

    result.map(|_| ())
}

fn print_status(controller: &Controller<BtleCentral>) {
    let snapshot = controller.session().snapshot();
    println!("Session: {}", snapshot.state);
    println!(
        "Service: {}",
        if snapshot.service_resolved { "found" } else { "missing" }
    );
    for role in CharacteristicRole::ALL {
        let found = if snapshot.is_resolved(role) { "found" } else { "missing" };
        println!("  {:<14} {found}", role.name());
    }
}
