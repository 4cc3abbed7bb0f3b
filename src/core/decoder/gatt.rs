//! Static GATT lookup tables used for display.
//! Keys are the 16-bit short form of the assigned UUID.

use uuid::Uuid;

use super::short_uuid;

/// Friendly names of well known services.
static SERVICE_NAMES: &[(u16, &str)] = &[
    (0x0001, "UART Service"),
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x1802, "Immediate Alert"),
    (0x1803, "Link Loss"),
    (0x1804, "Tx Power"),
    (0x1805, "Current Time"),
    (0x1808, "Glucose"),
    (0x1809, "Health Thermometer"),
    (0x180A, "Device Information"),
    (0x180D, "Heart Rate"),
    (0x180F, "Battery Service"),
    (0x1810, "Blood Pressure"),
    (0x1812, "Human Interface Device"),
    (0x1816, "Cycling Speed and Cadence"),
    (0x1818, "Cycling Power"),
    (0x1819, "Location and Navigation"),
    (0x181A, "Environmental Sensing"),
    (0x181C, "User Data"),
    (0x181D, "Weight Scale"),
    (0x1826, "Fitness Machine"),
    (0xFE59, "Nordic DFU"),
    (0xFFE0, "TI CC254x UART"),
];

/// Friendly names of vendor services that only have a 128-bit form.
static LONG_SERVICE_NAMES: &[(u128, &str)] = &[
    (0x6e400001_b5a3_f393_e0a9_e50e24dcca9e, "Nordic UART Service"),
    (0x49535343_fe7d_4ae5_8fa9_9fafd205e455, "Microchip Transparent UART"),
];

/// Human names of characteristics.
static CHARACTERISTIC_NAMES: &[(u16, &str)] = &[
    (0x2A00, "Device Name"),
    (0x2A01, "Appearance"),
    (0x2A03, "Reconnection Address"),
    (0x2A04, "Connection Parameters"),
    (0x2A05, "Service Changed"),
    (0x2A06, "Alert Level"),
    (0x2A07, "Tx Power Level"),
    (0x2A08, "Date Time"),
    (0x2A19, "Battery Level"),
    (0x2A1C, "Temperature Measurement"),
    (0x2A23, "System ID"),
    (0x2A24, "Model Number"),
    (0x2A25, "Serial Number"),
    (0x2A26, "Firmware Revision"),
    (0x2A27, "Hardware Revision"),
    (0x2A28, "Software Revision"),
    (0x2A29, "Manufacturer Name"),
    (0x2A2A, "Regulatory Certification"),
    (0x2A2B, "Current Time"),
    (0x2A35, "Blood Pressure Measurement"),
    (0x2A37, "Heart Rate Measurement"),
    (0x2A38, "Body Sensor Location"),
    (0x2A46, "New Alert"),
    (0x2A4D, "Report"),
    (0x2A4E, "Protocol Mode"),
    (0x2A50, "PnP ID"),
    (0x2A56, "Digital"),
    (0x2A58, "Analog"),
    (0x2A5B, "CSC Measurement"),
    (0x2A63, "Cycling Power Measurement"),
    (0x2A67, "Location and Speed"),
    (0x2A69, "Position Quality"),
    (0x2A6D, "Pressure"),
    (0x2A6E, "Temperature"),
    (0x2A6F, "Humidity"),
    (0x2A76, "Power"),
    (0x2A7E, "Aerobic Heart Rate Lower Limit"),
    (0x2A80, "Age"),
    (0x2A85, "Date of Birth"),
    (0x2A98, "Weight"),
    (0x2A9D, "Weight Measurement"),
    (0x2A9E, "Weight Scale Feature"),
    (0x2AA7, "CGM Measurement"),
    (0x2AA9, "CGM Status"),
    (0x2ACD, "Treadmill Data"),
];

/// Representative glyphs for the characteristics worth highlighting.
static CHARACTERISTIC_EMOJI: &[(u16, &str)] = &[
    (0x2A00, "🏷"),
    (0x2A01, "📏"),
    (0x2A03, "🔑"),
    (0x2A04, "📶"),
    (0x2A05, "🚨"),
    (0x2A06, "🔔"),
    (0x2A07, "📡"),
    (0x2A08, "⏰"),
    (0x2A19, "🔋"),
    (0x2A1C, "🌡"),
    (0x2A24, "📋"),
    (0x2A25, "🔖"),
    (0x2A26, "📦"),
    (0x2A27, "🔄"),
    (0x2A28, "🖥"),
    (0x2A29, "🏭"),
    (0x2A2A, "🔐"),
    (0x2A35, "💉"),
    (0x2A37, "❤️"),
    (0x2A46, "📳"),
    (0x2A4D, "🎮"),
    (0x2A56, "🔘"),
    (0x2A58, "⏳"),
    (0x2A63, "🚴"),
    (0x2A67, "🧭"),
    (0x2A6D, "🌬"),
    (0x2A6E, "🌡"),
    (0x2A6F, "💨"),
    (0x2A76, "⚡️"),
    (0x2A80, "👤"),
    (0x2A98, "💪"),
    (0x2A9D, "🏋️"),
    (0x2ACD, "🏃"),
];

/// Bluetooth SIG company identifiers as they appear in the first two bytes
/// of advertised manufacturer data.
static MANUFACTURERS: &[([u8; 2], &str)] = &[
    ([0x4C, 0x00], "Apple Inc."),
    ([0x2D, 0x01], "Samsung Electronics"),
    ([0x00, 0x1A], "Google"),
    ([0xF0, 0x02], "Bose Corporation"),
    ([0x00, 0x0D], "Texas Instruments"),
    ([0x00, 0x1B], "IBM"),
    ([0x75, 0x00], "Microsoft"),
    ([0xD8, 0xFE], "Fitbit"),
    ([0x00, 0x03], "Sony"),
    ([0xAC, 0x8B], "Logitech"),
    ([0xA4, 0xC1], "Anker Innovations"),
    ([0x38, 0x01], "Xiaomi"),
    ([0x6D, 0x62], "GoPro"),
    ([0xA0, 0x37], "Garmin"),
    ([0x48, 0x02], "Oculus VR"),
    ([0x43, 0x02], "Nintendo"),
    ([0xD4, 0x4E], "JBL"),
    ([0x9E, 0x8B], "Tile Inc."),
    ([0xEC, 0xFE], "OnePlus"),
    ([0x5A, 0xA5], "Beats by Dre"),
    ([0x1A, 0xFE], "Amazon"),
];

pub const UNKNOWN_MANUFACTURER: &str = "Unknown Manufacturer";

fn lookup<K: PartialEq + Copy>(table: &'static [(K, &'static str)], key: K) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Looks up the friendly name of a service.
pub fn service_name(uuid: &Uuid) -> Option<&'static str> {
    match short_uuid(uuid) {
        Some(short) => lookup(SERVICE_NAMES, short),
        None => lookup(LONG_SERVICE_NAMES, uuid.as_u128()),
    }
}

/// Looks up the human name of a characteristic.
pub fn characteristic_name(uuid: &Uuid) -> Option<&'static str> {
    short_uuid(uuid).and_then(|short| lookup(CHARACTERISTIC_NAMES, short))
}

/// Looks up the glyph of a characteristic by its short id.
pub fn characteristic_emoji(short: u16) -> Option<&'static str> {
    lookup(CHARACTERISTIC_EMOJI, short)
}

/// Iterates over every characteristic that has both a glyph and a name.
pub fn known_characteristics() -> impl Iterator<Item = (u16, &'static str, &'static str)> {
    CHARACTERISTIC_EMOJI.iter().filter_map(|(short, emoji)| {
        lookup(CHARACTERISTIC_NAMES, *short).map(|name| (*short, *emoji, name))
    })
}

/// Extracts the two byte manufacturer code from raw manufacturer data.
pub fn manufacturer_code(data: &[u8]) -> Option<[u8; 2]> {
    match data {
        [a, b, ..] => Some([*a, *b]),
        _ => None,
    }
}

/// Resolves a manufacturer code, falling back to [`UNKNOWN_MANUFACTURER`].
pub fn manufacturer_name(code: [u8; 2]) -> &'static str {
    lookup(MANUFACTURERS, code).unwrap_or(UNKNOWN_MANUFACTURER)
}
