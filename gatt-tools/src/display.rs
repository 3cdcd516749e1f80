//! Formatting of UUIDs, values and received chunks for the tools' output.

use bluez_async::{uuid_from_u16, BleUuid};
use gatt_stream::Chunk;
use std::ops::RangeInclusive;
use std::str;
use std::time::Instant;
use uuid::Uuid;

const PRINTABLE_ASCII_RANGE: RangeInclusive<u8> = 0x20..=0x7E;

/// Descriptions of well-known 16-bit UUIDs.
const UUID_NAMES: [(u16, &str); 19] = [
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x180A, "Device Information"),
    (0x180D, "Heart Rate"),
    (0x180F, "Battery Service"),
    (0x181A, "Environmental Sensing"),
    (0x2A00, "Device Name"),
    (0x2A01, "Appearance"),
    (0x2A05, "Service Changed"),
    (0x2A19, "Battery Level"),
    (0x2A24, "Model Number String"),
    (0x2A25, "Serial Number String"),
    (0x2A29, "Manufacturer Name String"),
    (0x2A2B, "Current Time"),
    (0x2A37, "Heart Rate Measurement"),
    (0x2A50, "PnP ID"),
    (0x2A6E, "Temperature"),
    (0x2902, "Client Characteristic Configuration"),
    (0xFF01, "Vendor Specific"),
];

/// The 16-bit alias of the given UUID, if it is based on the Bluetooth base UUID.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let alias = (uuid.as_u128() >> 96) as u32;
    let short = u16::try_from(alias).ok()?;
    (uuid_from_u16(short) == *uuid).then_some(short)
}

/// A human-readable description of what the given UUID identifies, or "Custom" if it isn't one
/// of the well-known ones.
pub fn uuid_description(uuid: &Uuid) -> &'static str {
    short_uuid(uuid)
        .and_then(|short| UUID_NAMES.iter().find(|(alias, _)| *alias == short))
        .map_or("Custom", |(_, name)| *name)
}

/// Formats a UUID succinctly along with its description, e.g. `0x2a19 (Battery Level)`.
pub fn describe_uuid(uuid: &Uuid) -> String {
    format!("{} ({})", uuid.succinctly(), uuid_description(uuid))
}

/// Hex encoding of the given bytes, e.g. `0x1C09`.
pub fn hex_bytes(value: &[u8]) -> String {
    format!("0x{}", hex::encode_upper(value))
}

/// Guesses whether the given value is a string, and formats it as the quoted string followed by
/// its hex encoding if so, or just the hex encoding otherwise.
pub fn describe_value(value: &[u8]) -> String {
    if value.is_empty() {
        return "(empty)".to_string();
    }
    // Strings are often NUL-terminated.
    let text = value.strip_suffix(&[0]).unwrap_or(value);
    if !text.is_empty() && text.iter().all(|c| PRINTABLE_ASCII_RANGE.contains(c)) {
        if let Ok(string) = str::from_utf8(text) {
            return format!("{:?} [{}]", string, hex_bytes(value));
        }
    }
    format!("[{}]", hex_bytes(value))
}

/// One line of the raw chunk log, with the arrival time relative to `start`.
pub fn format_chunk(chunk: &Chunk, start: Instant) -> String {
    let elapsed = chunk.received_at.saturating_duration_since(start);
    format!(
        "[{:>7.2}s] {} bytes from {}: {}",
        elapsed.as_secs_f64(),
        chunk.data.len(),
        chunk.characteristic.succinctly(),
        describe_value(&chunk.data)
    )
}

pub fn mark(present: bool) -> &'static str {
    if present {
        "yes"
    } else {
        "no"
    }
}
