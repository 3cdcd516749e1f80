//! Decoding of an accumulated notification buffer into a series of fixed-point readings.

use std::fmt::{self, Display, Formatter};

/// Width in bytes of a single record in the accumulated buffer.
pub const RECORD_WIDTH: usize = 2;

/// Raw record values are hundredths of the physical unit.
const FIXED_POINT_DIVISOR: f64 = 100.0;

/// A single decoded value, along with where in the buffer it came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Byte offset of the start of the record within the accumulated buffer.
    pub offset: usize,
    /// The raw little-endian record value.
    pub raw: u16,
    /// The value in physical units (e.g. ºC), with 2 decimal places of precision.
    pub value: f64,
}

impl Display for Reading {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:.2}", self.value)
    }
}

/// A non-fatal problem found while decoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeWarning {
    /// The buffer had an odd number of bytes, so the last one could not be decoded and was
    /// dropped.
    TruncatedTrailingByte {
        /// Total length of the buffer, in bytes.
        length: usize,
    },
}

impl Display for DecodeWarning {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::TruncatedTrailingByte { length } => write!(
                f,
                "Total number of bytes ({length}) is odd, the last byte was ignored."
            ),
        }
    }
}

/// The result of decoding a buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decoded {
    pub readings: Vec<Reading>,
    pub warning: Option<DecodeWarning>,
}

impl Decoded {
    /// Formats the readings as comma-separated values with 2 decimal places, e.g. `23.32,23.36`.
    pub fn to_csv(&self) -> String {
        readings_to_csv(&self.readings)
    }
}

/// Decode the given buffer as a sequence of 2-byte little-endian unsigned records.
///
/// Every record maps to `raw / 100.0`, with no clamping or range checks. If the buffer has an odd
/// length the trailing byte is dropped and a [`DecodeWarning::TruncatedTrailingByte`] is returned
/// alongside the complete records.
pub fn decode(buffer: &[u8]) -> Decoded {
    let warning = if buffer.len() % RECORD_WIDTH != 0 {
        let warning = DecodeWarning::TruncatedTrailingByte {
            length: buffer.len(),
        };
        log::warn!("{}", warning);
        Some(warning)
    } else {
        None
    };

    let readings = buffer
        .chunks_exact(RECORD_WIDTH)
        .enumerate()
        .map(|(index, record)| {
            let raw = u16::from_le_bytes([record[0], record[1]]);
            Reading {
                offset: index * RECORD_WIDTH,
                raw,
                value: f64::from(raw) / FIXED_POINT_DIVISOR,
            }
        })
        .collect();

    Decoded { readings, warning }
}

/// Formats readings as comma-separated values with 2 decimal places.
pub fn readings_to_csv(readings: &[Reading]) -> String {
    readings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
