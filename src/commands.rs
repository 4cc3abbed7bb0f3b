//! Command handlers
//! This module defines every command that can be invoked from the command line.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::core::accessory::AccessorySession;
use crate::core::assistant::{Analysis, Assistant};
use crate::core::bluetooth::{
    BleEvent, BleObserver, BluetoothManager, DeviceFilter, PeripheralRecord, UartSession,
    WriteMode, ACCESSORY_NAME, ACCESSORY_PROTOCOL,
};
use crate::core::decoder::{
    characteristic_emoji, display_uuid, format_properties, known_characteristics, parse_uuid,
    short_uuid, DEFAULT_EMOJI,
};
use crate::state::AppState;
use crate::utils::parse_hex;

/// Prints live events to stdout.
pub struct ConsolePrinter;

impl BleObserver for ConsolePrinter {
    fn on_event(&self, event: &BleEvent) {
        match event {
            BleEvent::ValueUpdated { line, .. } | BleEvent::Sent { line, .. } => {
                println!("{}", line)
            }
            BleEvent::AccessoryReceived(line) => println!("{}", line),
            BleEvent::DeviceConnected { id } => println!("✅ Connected to {}", id),
            BleEvent::DeviceDisconnected { id } => println!("❌ Disconnected from {}", id),
            BleEvent::ScanStarted => println!("🔍 Scanning..."),
            BleEvent::ScanComplete => println!("Scan complete"),
            BleEvent::Status(_) | BleEvent::Log(_) | BleEvent::DevicesUpdated(_) => {}
        }
    }
}

/// Subscribes a [`ConsolePrinter`]; events print for as long as the handle lives.
fn attach_printer(state: &AppState) -> Arc<dyn BleObserver> {
    let printer: Arc<dyn BleObserver> = Arc::new(ConsolePrinter);
    state.hub.subscribe(&printer);
    printer
}

fn require_uuid(input: &str) -> Result<Uuid> {
    parse_uuid(input).ok_or_else(|| anyhow!("Invalid characteristic UUID: {}", input))
}

/// Finds the device by scanning if needed, then connects to it.
async fn connected_manager<'a>(state: &'a AppState, id: &str) -> Result<&'a BluetoothManager> {
    let manager = state.bluetooth_manager().await?;
    let timeout = Duration::from_secs(state.config.connection.connect_timeout_secs);
    manager.wait_for_device(id, timeout).await?;
    manager.connect_device(id).await?;
    Ok(manager)
}

fn print_device_row(record: &PeripheralRecord) {
    println!(
        "{:<40} {:<24} {:>5} dBm  {}{}",
        record.id,
        record.display_name(),
        record.rssi,
        record.manufacturer_label(),
        if record.is_uart { "  [UART]" } else { "" }
    );
}

/// Scans for a while and lists the devices that match the filter.
///
/// # Arguments
/// * `duration_secs` - Scan duration, the configured default when `None`
/// * `filter` - Which devices to list
pub async fn scan(state: &AppState, duration_secs: Option<u64>, filter: DeviceFilter) -> Result<()> {
    let manager = state.bluetooth_manager().await?;
    let duration = Duration::from_secs(duration_secs.unwrap_or(state.config.scan.duration_secs));

    let mut new_devices = manager.start_scan().await?;
    tokio::time::sleep(duration).await;
    manager.stop_scan().await?;

    let mut discovered = Vec::new();
    while let Ok(id) = new_devices.try_recv() {
        discovered.push(id);
    }
    if state.config.scan.auto_probe {
        for id in &discovered {
            probe(manager, id).await;
        }
    }

    let devices = manager.devices(filter).await;
    println!("Found {} devices", devices.len());
    for record in &devices {
        print_device_row(record);
    }
    Ok(())
}

/// Connects to fetch the services of a device, then lets it go again.
async fn probe(manager: &BluetoothManager, id: &str) {
    match manager.connect_device(id).await {
        Ok(()) => {
            if let Err(e) = manager.disconnect(id).await {
                warn!("Failed to disconnect {} after probing: {}", id, e);
            }
        }
        Err(e) => warn!("Probing {} failed: {}", id, e),
    }
}

/// Prints the advertisement and the GATT tree, reading every readable value.
pub async fn inspect(state: &AppState, id: &str) -> Result<()> {
    let manager = connected_manager(state, id).await?;

    let readable: Vec<Uuid> = manager
        .device(id)
        .await
        .map(|record| {
            record
                .services
                .iter()
                .flat_map(|s| &s.characteristics)
                .filter(|c| c.props.read)
                .map(|c| c.uuid)
                .collect()
        })
        .unwrap_or_default();
    for uuid in readable {
        if let Err(e) = manager.read_characteristic(id, &uuid).await {
            warn!("Failed to read {}: {}", display_uuid(&uuid), e);
        }
    }

    let record = manager
        .device(id)
        .await
        .ok_or_else(|| anyhow!("Device {} vanished", id))?;
    println!("{} ({})", record.display_name(), record.id);
    println!("Manufacturer: {}", record.manufacturer_label());
    println!("RSSI: {} dBm", record.rssi);
    for (key, value) in record.advertisement.entries() {
        println!("  {}: {}", key, value);
    }

    for service in &record.services {
        println!(
            "Service {} {}",
            display_uuid(&service.uuid),
            service.name().unwrap_or("Unknown Service")
        );
        for characteristic in &service.characteristics {
            let emoji = short_uuid(&characteristic.uuid)
                .and_then(characteristic_emoji)
                .unwrap_or(DEFAULT_EMOJI);
            println!(
                "  {} {} {} {}{}",
                emoji,
                display_uuid(&characteristic.uuid),
                characteristic.name().unwrap_or("Unknown Characteristic"),
                format_properties(&characteristic.props),
                characteristic
                    .decoded_value()
                    .map(|value| format!(" = {}", value))
                    .unwrap_or_default()
            );
        }
    }

    manager.disconnect(id).await
}

pub async fn read(state: &AppState, id: &str, characteristic: &str) -> Result<()> {
    let uuid = require_uuid(characteristic)?;
    let manager = connected_manager(state, id).await?;
    let line = manager.read_characteristic(id, &uuid).await?;
    println!("{}", line);
    manager.disconnect(id).await
}

/// Writes text, or hex bytes with `hex`, to a characteristic.
pub async fn write(
    state: &AppState,
    id: &str,
    characteristic: &str,
    data: &str,
    hex: bool,
    no_response: bool,
) -> Result<()> {
    let uuid = require_uuid(characteristic)?;
    let payload = if hex {
        parse_hex(data)?
    } else {
        data.as_bytes().to_vec()
    };
    let mode = if no_response {
        WriteMode::WithoutResponse
    } else {
        WriteMode::WithResponse
    };

    let manager = connected_manager(state, id).await?;
    let line = manager.write_characteristic(id, &uuid, payload, mode).await?;
    println!("{}", line);
    manager.disconnect(id).await
}

/// Prints notifications until Ctrl-C. Without a characteristic every
/// notifying characteristic is subscribed.
pub async fn listen(state: &AppState, id: &str, characteristic: Option<&str>) -> Result<()> {
    let _printer = attach_printer(state);
    let manager = connected_manager(state, id).await?;

    let targets: Vec<Uuid> = match characteristic {
        Some(input) => vec![require_uuid(input)?],
        None => manager
            .device(id)
            .await
            .map(|record| {
                record
                    .services
                    .iter()
                    .flat_map(|s| &s.characteristics)
                    .filter(|c| c.props.is_subscribable())
                    .map(|c| c.uuid)
                    .collect()
            })
            .unwrap_or_default(),
    };
    if targets.is_empty() {
        return Err(anyhow!("Device {} has no characteristic to listen to", id));
    }
    for uuid in &targets {
        manager.listen(id, uuid).await?;
        println!("👂 Listening to {}", display_uuid(uuid));
    }

    tokio::signal::ctrl_c().await?;
    manager.disconnect(id).await
}

/// Interactive UART terminal.
///
/// Lines typed on stdin are sent to the TX characteristic. Lines starting
/// with `:` are local commands: `:listen <UUID>`, `:save <FILE>`, `:analyze`
/// and `:quit`.
pub async fn uart(state: &AppState, id: &str, tx: Option<&str>) -> Result<()> {
    let tx = tx.map(require_uuid).transpose()?;
    let _printer = attach_printer(state);
    let manager = connected_manager(state, id).await?;
    let mut session = manager.open_uart(id, tx).await?;

    println!(
        "UART session with {} (TX {}, listening {})",
        id,
        session.tx().map(|u| display_uuid(&u)).unwrap_or_default(),
        session
            .listening()
            .map(|u| display_uuid(&u))
            .unwrap_or_else(|| "none".to_string())
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match uart_input(state, manager, &mut session, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("⚠️ {}", e),
        }
    }

    manager.disconnect(id).await
}

/// Handles one input line. Returns false when the session should end.
async fn uart_input(
    state: &AppState,
    manager: &BluetoothManager,
    session: &mut UartSession,
    line: &str,
) -> Result<bool> {
    let Some(command) = line.strip_prefix(':') else {
        manager.uart_send(session, line).await?;
        return Ok(true);
    };
    let (name, argument) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "quit" | "q" => return Ok(false),
        "listen" => {
            let uuid = require_uuid(argument)?;
            manager.uart_select_listening(session, uuid).await?;
            println!("👂 Listening to {}", display_uuid(&uuid));
        }
        "save" => {
            tokio::fs::write(argument.trim(), session.transcript_text()).await?;
            println!("Transcript saved to {}", argument.trim());
        }
        "analyze" => {
            let analysis = ask_assistant(state, &session.transcript_text()).await?;
            print_analysis(&analysis);
        }
        other => return Err(anyhow!("Unknown command :{}", other)),
    }
    Ok(true)
}

pub async fn info(state: &AppState, id: &str) -> Result<()> {
    let manager = connected_manager(state, id).await?;
    for (label, value) in manager.read_device_info(id).await? {
        println!("{}: {}", label, value);
    }
    manager.disconnect(id).await
}

pub async fn battery(state: &AppState, id: &str) -> Result<()> {
    let manager = connected_manager(state, id).await?;
    match manager.read_battery_level(id).await? {
        Some(level) => println!("🔋 Battery Level: {}%", level),
        None => println!("No battery level available"),
    }
    manager.disconnect(id).await
}

pub async fn find_me(state: &AppState, id: &str, characteristic: &str) -> Result<()> {
    let uuid = require_uuid(characteristic)?;
    let manager = connected_manager(state, id).await?;
    println!("{}", manager.find_me(id, &uuid).await?);
    manager.disconnect(id).await
}

/// Requests logged data for a time range and prints the replies until Ctrl-C.
pub async fn fm_get(
    state: &AppState,
    id: &str,
    characteristic: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    unsent_only: bool,
) -> Result<()> {
    let uuid = require_uuid(characteristic)?;
    let _printer = attach_printer(state);
    let manager = connected_manager(state, id).await?;

    let subscribable = manager
        .device(id)
        .await
        .and_then(|record| record.find_characteristic(&uuid).map(|c| c.props.is_subscribable()))
        .unwrap_or(false);
    if subscribable {
        manager.listen(id, &uuid).await?;
    }

    println!("{}", manager.fm_get(id, &uuid, start, end, !unsent_only).await?);
    tokio::signal::ctrl_c().await?;
    manager.disconnect(id).await
}

pub async fn auto_connect_list(state: &AppState) -> Result<()> {
    let manager = state.bluetooth_manager().await?;
    let ids = manager.auto_connect_list().await;
    if ids.is_empty() {
        println!("No auto-connect devices");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

pub async fn auto_connect_add(state: &AppState, id: &str) -> Result<()> {
    let manager = state.bluetooth_manager().await?;
    if manager.auto_connect_add(id).await? {
        println!("Added {} to auto-connect", id);
    } else {
        println!("{} is already in auto-connect", id);
    }
    Ok(())
}

pub async fn auto_connect_remove(state: &AppState, id: &str) -> Result<()> {
    let manager = state.bluetooth_manager().await?;
    if manager.auto_connect_remove(id).await? {
        println!("Removed {} from auto-connect", id);
    } else {
        println!("{} was not in auto-connect", id);
    }
    Ok(())
}

/// Keeps scanning, connecting auto-connect devices as they appear, until Ctrl-C.
pub async fn watch(state: &AppState) -> Result<()> {
    let _printer = attach_printer(state);
    let manager = state.bluetooth_manager().await?;

    let mut new_devices = manager.start_scan().await?;
    manager.auto_reconnect().await;

    loop {
        tokio::select! {
            id = new_devices.recv() => {
                let Some(id) = id else { break };
                if manager.is_auto_connect(&id).await {
                    info!("Auto-connecting to {}", id);
                    if let Err(e) = manager.connect_device(&id).await {
                        warn!("Auto-connect to {} failed: {}", id, e);
                    }
                } else if state.config.scan.auto_probe {
                    probe(manager, &id).await;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn ask_assistant(state: &AppState, transcript: &str) -> Result<Analysis> {
    let assistant = Assistant::from_env(state.config.assistant.clone())?;
    println!("Analyzing...");
    Ok(assistant.analyze(transcript).await?)
}

fn print_analysis(analysis: &Analysis) {
    println!("{}", analysis.probable_device);
    println!();
    println!("{}", analysis.answer);
    if !analysis.commands.is_empty() {
        println!();
        println!("Suggested commands:");
        for command in &analysis.commands {
            println!(
                "  {:<8} {:<28} {} [{}]",
                command.command_id, command.function, command.description, command.hex_data
            );
        }
    }
}

/// Sends a saved transcript to the assistant.
pub async fn analyze(state: &AppState, transcript_file: &Path) -> Result<()> {
    let transcript = tokio::fs::read_to_string(transcript_file).await?;
    let analysis = ask_assistant(state, &transcript).await?;
    print_analysis(&analysis);
    Ok(())
}

/// Opens a serial session with the accessory behind `path` (an RFCOMM tty).
pub async fn accessory(state: &AppState, path: &Path) -> Result<()> {
    let _printer = attach_printer(state);
    let stream = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .await?;
    println!(
        "Session with {} ({}) on {}",
        ACCESSORY_NAME,
        ACCESSORY_PROTOCOL,
        path.display()
    );

    let mut session = AccessorySession::open(stream, state.hub.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => session.send(&line).await?,
                    None => break,
                }
            }
            _ = session.closed() => {
                println!("Accessory closed the session");
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    session.close().await;
    Ok(())
}

/// Lists the characteristics the decoder knows by name.
pub fn gatt_names() {
    for (short, emoji, name) in known_characteristics() {
        println!("{} {:04X} {}", emoji, short, name);
    }
}
