use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use ble_inspector_lib::commands;
use ble_inspector_lib::core::bluetooth::{DeviceFilter, EventHub};
use ble_inspector_lib::{logging, state::AppState};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{error, info};

/// Scan, inspect and talk to Bluetooth Low Energy peripherals.
#[derive(Parser)]
#[command(name = "ble-inspector", version, about)]
struct Cli {
    /// Config file, defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and list nearby devices
    Scan {
        /// Scan duration in seconds
        #[arg(long)]
        duration: Option<u64>,
        #[arg(long, value_enum, default_value_t = DeviceFilter::All)]
        filter: DeviceFilter,
    },
    /// Connect and print the GATT tree with decoded values
    Inspect { id: String },
    /// Read one characteristic
    Read { id: String, characteristic: String },
    /// Write text, or hex bytes, to a characteristic
    Write {
        id: String,
        characteristic: String,
        data: String,
        /// Interpret DATA as hex bytes
        #[arg(long)]
        hex: bool,
        /// Write without response
        #[arg(long)]
        no_response: bool,
    },
    /// Print notifications until Ctrl-C
    Listen {
        id: String,
        characteristic: Option<String>,
    },
    /// Interactive UART terminal
    Uart {
        id: String,
        /// Characteristic to send on when the device has several
        #[arg(long)]
        tx: Option<String>,
    },
    /// Read the Device Information service
    Info { id: String },
    /// Read the battery level
    Battery { id: String },
    /// Make the device beep
    FindMe { id: String, characteristic: String },
    /// Request logged data for a time range
    FmGet {
        id: String,
        characteristic: String,
        /// Range start, RFC 3339
        #[arg(long)]
        start: DateTime<Utc>,
        /// Range end, RFC 3339
        #[arg(long)]
        end: DateTime<Utc>,
        /// Only records that were not sent yet
        #[arg(long)]
        unsent: bool,
    },
    /// Manage devices that are reconnected automatically
    AutoConnect {
        #[command(subcommand)]
        action: AutoConnectAction,
    },
    /// Keep scanning and reconnect auto-connect devices until Ctrl-C
    Watch,
    /// Ask the assistant what device produced a saved transcript
    Analyze { transcript_file: PathBuf },
    /// Talk to a serial accessory over an open RFCOMM device
    Accessory { path: PathBuf },
    /// Print the known GATT service and characteristic names
    GattNames,
}

#[derive(Subcommand)]
enum AutoConnectAction {
    List,
    Add { id: String },
    Remove { id: String },
}

async fn run(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Scan { duration, filter } => commands::scan(state, duration, filter).await,
        Command::Inspect { id } => commands::inspect(state, &id).await,
        Command::Read { id, characteristic } => commands::read(state, &id, &characteristic).await,
        Command::Write {
            id,
            characteristic,
            data,
            hex,
            no_response,
        } => commands::write(state, &id, &characteristic, &data, hex, no_response).await,
        Command::Listen { id, characteristic } => {
            commands::listen(state, &id, characteristic.as_deref()).await
        }
        Command::Uart { id, tx } => commands::uart(state, &id, tx.as_deref()).await,
        Command::Info { id } => commands::info(state, &id).await,
        Command::Battery { id } => commands::battery(state, &id).await,
        Command::FindMe { id, characteristic } => {
            commands::find_me(state, &id, &characteristic).await
        }
        Command::FmGet {
            id,
            characteristic,
            start,
            end,
            unsent,
        } => commands::fm_get(state, &id, &characteristic, start, end, unsent).await,
        Command::AutoConnect { action } => match action {
            AutoConnectAction::List => commands::auto_connect_list(state).await,
            AutoConnectAction::Add { id } => commands::auto_connect_add(state, &id).await,
            AutoConnectAction::Remove { id } => commands::auto_connect_remove(state, &id).await,
        },
        Command::Watch => commands::watch(state).await,
        Command::Analyze { transcript_file } => commands::analyze(state, &transcript_file).await,
        Command::Accessory { path } => commands::accessory(state, &path).await,
        Command::GattNames => {
            commands::gatt_names();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (hub, dispatcher) = EventHub::new();
    dispatcher.spawn();
    logging::setup_logging(hub.clone(), cli.verbose);

    let state = match AppState::new(cli.config, hub).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize AppState: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Configuration loaded from {}", state.config_path.display());

    let result = run(&state, cli.command).await;
    state.shutdown().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
