//! Characteristic payload decoding
//! This module turns raw characteristic values into display strings.
//!
//! Decoding never fails. The rules are applied in a fixed order:
//! UTF-8 text first, then the meaning of well known GATT characteristics,
//! then a guess based on the payload length, and finally a hex dump.

pub mod gatt;

use uuid::Uuid;

use crate::core::bluetooth::CharacteristicProps;

pub use gatt::{
    characteristic_emoji, characteristic_name, known_characteristics, manufacturer_code,
    manufacturer_name, service_name, UNKNOWN_MANUFACTURER,
};

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Glyph used for characteristics without a dedicated one.
pub const DEFAULT_EMOJI: &str = "🔹";

/// Builds a full UUID from its 16-bit short form.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Returns the 16-bit short form when the UUID is built on the Bluetooth base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let prefix = value >> 96;
    if value & !(0xFFFF_FFFFu128 << 96) == BLUETOOTH_BASE_UUID && prefix <= 0xFFFF {
        Some(prefix as u16)
    } else {
        None
    }
}

/// Formats a UUID the way it is shown everywhere: `2A19` for short forms,
/// uppercase hyphenated otherwise.
pub fn display_uuid(uuid: &Uuid) -> String {
    match short_uuid(uuid) {
        Some(short) => format!("{:04X}", short),
        None => uuid.hyphenated().to_string().to_uppercase(),
    }
}

/// Parses `2A19`, `0x2a19` or a full UUID.
pub fn parse_uuid(input: &str) -> Option<Uuid> {
    let trimmed = input.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if short.len() == 4 {
        return u16::from_str_radix(short, 16).ok().map(uuid_from_u16);
    }
    Uuid::parse_str(trimmed).ok()
}

/// Uppercase, space separated hex dump.
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes a characteristic value into a display string.
pub fn decode_value(uuid: &Uuid, data: &[u8]) -> String {
    if let Some(text) = decode_text(data) {
        return text;
    }
    if let Some(known) = short_uuid(uuid).and_then(|short| decode_known(short, data)) {
        return known;
    }
    decode_by_length(data)
}

fn decode_text(data: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(data).ok()?;
    // Control characters are trimmed along with whitespace, so NUL padded
    // strings read cleanly and single control bytes such as a battery level
    // of 5 fall through to the numeric rules instead of printing as text.
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c.is_control());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn decode_known(short: u16, data: &[u8]) -> Option<String> {
    match (short, data) {
        // Battery Level
        (0x2A19, [level]) => Some(format!("{}%", level)),
        // Temperature, hundredths of a degree
        (0x2A6E, [lo, hi]) => {
            let raw = i16::from_le_bytes([*lo, *hi]);
            Some(format!("{:.2} °C", raw as f64 / 100.0))
        }
        // Humidity, hundredths of a percent
        (0x2A6F, [lo, hi]) => {
            let raw = u16::from_le_bytes([*lo, *hi]);
            Some(format!("{:.2} %", raw as f64 / 100.0))
        }
        // Heart Rate Measurement
        (0x2A37, [_, bpm, ..]) => Some(format!("{} bpm", bpm)),
        // Power
        (0x2A76, [a, b, c, d]) => Some(format!("{} W", u32::from_le_bytes([*a, *b, *c, *d]))),
        // Date Time
        (0x2A08, [y0, y1, month, day, hour, minute, second]) => Some(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            u16::from_le_bytes([*y0, *y1]),
            month,
            day,
            hour,
            minute,
            second
        )),
        // Tx Power Level
        (0x2A07, [power]) => Some(format!("{} dBm", *power as i8)),
        _ => None,
    }
}

fn decode_by_length(data: &[u8]) -> String {
    match data {
        [b] => b.to_string(),
        [a, b] => u16::from_le_bytes([*a, *b]).to_string(),
        [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]).to_string(),
        _ if data.len() == 16 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(data);
            Uuid::from_bytes(bytes).hyphenated().to_string().to_uppercase()
        }
        _ => hex_string(data),
    }
}

/// Formats a property set as `[📖 Read, ✍️ Write]`, empty when nothing is set.
pub fn format_properties(props: &CharacteristicProps) -> String {
    let labels: Vec<&str> = [
        (props.read, "📖 Read"),
        (props.write, "✍️ Write"),
        (props.write_without_response, "✍️ Write (No Response)"),
        (props.notify, "🚀 Notify"),
        (props.indicate, "🔔 Indicate"),
        (props.broadcast, "📡 Broadcast"),
        (props.authenticated_signed_writes, "🔒 Auth Write"),
        (props.extended_properties, "🛠 Extended"),
    ]
    .into_iter()
    .filter_map(|(set, label)| set.then_some(label))
    .collect();

    if labels.is_empty() {
        String::new()
    } else {
        format!("[{}]", labels.join(", "))
    }
}

/// Builds the transcript line for a value received from a characteristic.
pub fn format_received(uuid: &Uuid, props: &CharacteristicProps, data: &[u8]) -> String {
    let display = display_uuid(uuid);
    let suffix = &display[display.len().saturating_sub(4)..];
    let read_indicator = if props.read { "📖" } else { "" };

    let hex = hex_string(data);
    let mut decoded = decode_value(uuid, data);
    if decoded == hex {
        decoded = "RAW: ".to_string();
    }

    let known = short_uuid(uuid).and_then(|short| {
        characteristic_emoji(short).zip(characteristic_name(uuid))
    });
    match known {
        Some((emoji, name)) => format!(
            "📡 {} {} [{}] {}: {}",
            emoji, read_indicator, suffix, name, decoded
        ),
        None => format!(
            "📡 {} {} [{}] Received: {} ({})",
            DEFAULT_EMOJI, read_indicator, suffix, decoded, hex
        ),
    }
}
