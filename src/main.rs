//! Command-line front end for a single T-Cube on a serial port.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_tcube::adapters::SerialAdapter;
use rust_tcube::config::{Settings, DEFAULT_CONFIG_PATH};
use rust_tcube::hardware::{Kpz101, Ksg101, PiezoSetup};
use rust_tcube::protocol::Frame;
use rust_tcube::{logging, DeviceSession};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tcube")]
#[command(about = "Drive a Thorlabs T-Cube piezo or strain-gauge unit")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overriding the configuration file
    #[arg(short, long)]
    port: Option<String>,

    /// Which unit is on the port
    #[arg(short, long, value_enum, default_value = "kpz")]
    device: Device,

    #[command(subcommand)]
    command: Action,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Device {
    /// KPZ101 piezo driver
    Kpz,
    /// KSG101 strain-gauge reader
    Ksg,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Handshake and print the hardware info
    Info,
    /// Apply the configured start-up settings and enable the output
    Configure,
    /// Set the output voltage in volts
    SetVoltage { volts: f64 },
    /// Set the position in micrometers (closed loop only)
    SetPosition { micrometers: f64 },
    /// Zero the strain gauge
    Zero,
    /// Print a status update frame
    Status,
    /// Print a strain-gauge reading frame
    Reading,
}

fn print_frame(frame: &Frame) {
    let body = frame.payload().unwrap_or(&frame.trailing[..]);
    println!(
        "message {:#06x} params {:#04x} {:#04x} from {:#04x}: {:02X?}",
        frame.message_id,
        frame.param1,
        frame.param2,
        frame.source,
        &body[..]
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::from_path(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(port) = args.port {
        settings.serial.port = port;
    }
    logging::init(&settings.application.log_level);

    let adapter = SerialAdapter::open(
        &settings.serial.port,
        settings.serial.baud_rate,
        Duration::from_millis(settings.timing.read_timeout_ms),
        Duration::from_millis(settings.serial.poll_interval_ms),
    )
    .with_context(|| format!("Failed to open serial port {}", settings.serial.port))?;

    let session = DeviceSession::open(
        adapter,
        settings.address,
        settings.calibration()?,
        settings.timing(),
    )
    .await
    .context("Handshake failed")?;
    info!("Session open on {}", settings.serial.port);

    match args.device {
        Device::Kpz => {
            let piezo = Kpz101::new(session);
            match args.command {
                Action::Info => {}
                Action::Configure => piezo.configure(&PiezoSetup::from_settings(&settings)?).await?,
                Action::SetVoltage { volts } => piezo.set_voltage(volts).await?,
                Action::SetPosition { micrometers } => piezo.set_position(micrometers).await?,
                Action::Status => print_frame(&piezo.status().await?),
                Action::Zero | Action::Reading => {
                    anyhow::bail!("{:?} is a strain-gauge command; use --device ksg", args.command)
                }
            }
            if let Some(hw) = piezo.session().hardware_info().await {
                println!("{hw:#?}");
            }
            piezo.close().await?;
        }
        Device::Ksg => {
            let gauge = Ksg101::new(session);
            match args.command {
                Action::Info => {}
                Action::Configure => gauge.enable().await?,
                Action::Zero => gauge.zero().await?,
                Action::Status => print_frame(&gauge.status().await?),
                Action::Reading => print_frame(&gauge.reading().await?),
                Action::SetVoltage { .. } | Action::SetPosition { .. } => {
                    anyhow::bail!("{:?} is a piezo command; use --device kpz", args.command)
                }
            }
            if let Some(hw) = gauge.session().hardware_info().await {
                println!("{hw:#?}");
            }
            gauge.close().await?;
        }
    }

    Ok(())
}
