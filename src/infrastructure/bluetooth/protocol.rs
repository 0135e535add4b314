//! GATT protocol helpers
//!
//! Characteristic UUID parsing and the two write modes offered by the link.

use anyhow::Result;
use uuid::Uuid;

/// Bluetooth SIG base UUID, used to expand 16/32-bit short forms.
/// `0000xxxx-0000-1000-8000-00805f9b34fb`
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// How a characteristic write is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write request, completes when the peripheral acknowledges
    Acknowledged,
    /// Write command, no response from the peripheral
    BestEffort,
}

impl WriteMode {
    pub fn from_require_ack(require_ack: bool) -> Self {
        if require_ack {
            Self::Acknowledged
        } else {
            Self::BestEffort
        }
    }
}

/// Parse a characteristic UUID.
///
/// Accepts the full 128-bit form (with or without hyphens, any case) and the
/// 16-bit (`2a37`) or 32-bit (`0000180d`) short forms, which are expanded onto
/// the Bluetooth base UUID.
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    let trimmed = uuid_str.trim().trim_start_matches("0x");

    match trimmed.len() {
        4 | 8 => {
            let short = u32::from_str_radix(trimmed, 16)?;
            Ok(Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96)))
        }
        _ => Ok(Uuid::parse_str(trimmed)?),
    }
}
