//! Command line client for SwitchBot device sessions
//!
//! Finds a device by address, then reads or writes its name or sends raw
//! commands to it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use bluest::Adapter;
use clap::{Parser, Subcommand};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use log::{LevelFilter, info, warn};

use switchbot_session_lib::config::{CONFIG_FILE_NAME, SessionConfig};
use switchbot_session_lib::core::bluetooth::constants::DEFAULT_SCAN_DURATION_SECS;
use switchbot_session_lib::core::bluetooth::{BluestPeripheral, DeviceSession, scanner};
use switchbot_session_lib::logging;

#[derive(Parser)]
#[command(name = "switchbot-session")]
#[command(about = "Talk to a SwitchBot device over BLE")]
struct Cli {
    /// MAC address or platform id (or a unique part of either) of the device
    #[arg(short, long)]
    device: String,

    /// Session config file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// How long to scan for the device, in seconds
    #[arg(long, default_value_t = DEFAULT_SCAN_DURATION_SECS)]
    scan_secs: u64,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read or write the device name
    Name {
        #[command(subcommand)]
        action: NameAction,
    },
    /// Send raw commands, given as hex, and print each response
    Command {
        #[arg(required = true)]
        hex: Vec<String>,
    },
}

#[derive(Subcommand)]
enum NameAction {
    Get,
    Set { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    logging::init(level);

    // parse hex up front so a typo does not cost a scan
    let commands = match &cli.command {
        Commands::Command { hex } => hex
            .iter()
            .map(|h| {
                HEXLOWER_PERMISSIVE
                    .decode(h.as_bytes())
                    .map_err(|e| anyhow!("Invalid hex command {}: {}", h, e))
            })
            .collect::<Result<Vec<_>>>()?,
        Commands::Name { .. } => Vec::new(),
    };

    let config = SessionConfig::load(&cli.config).await?;

    let adapter = Adapter::default()
        .await
        .ok_or_else(|| anyhow!("Bluetooth adapter not found"))?;
    adapter.wait_available().await?;
    info!("Bluetooth adapter is available");

    let (device, identity) =
        scanner::find_device(&adapter, &cli.device, Duration::from_secs(cli.scan_secs)).await?;
    let peripheral = BluestPeripheral::new(adapter, device);
    let session = DeviceSession::with_config(identity, peripheral, config);

    match cli.command {
        Commands::Name { action: NameAction::Get } => {
            let name = session.get_device_name().await?;
            println!("{}", name);
        }
        Commands::Name { action: NameAction::Set { name } } => {
            session.set_device_name(&name).await?;
            println!("Device name set to {}", name);
        }
        Commands::Command { .. } => run_commands(&session, &commands).await?,
    }

    Ok(())
}

async fn run_commands(
    session: &DeviceSession<BluestPeripheral>,
    commands: &[Vec<u8>],
) -> Result<()> {
    // keep one link for a batch instead of reconnecting per command
    let hold_link = commands.len() > 1;
    if hold_link {
        session.connect().await?;
    }

    let mut outcome = Ok(());
    for command in commands {
        match session.send_command(command).await {
            Ok(response) => println!("{} -> {}", HEXLOWER.encode(command), HEXLOWER.encode(&response)),
            Err(e) => {
                outcome = Err(anyhow!("Command {} failed: {}", HEXLOWER.encode(command), e));
                break;
            }
        }
    }

    if hold_link {
        if let Err(e) = session.disconnect().await {
            warn!("Failed to disconnect: {}", e);
        }
    }
    outcome
}
