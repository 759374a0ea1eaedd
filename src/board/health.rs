//! Board health report.
//!
//! The board answers the health vendor request with a packed little-endian
//! struct of exactly [`HEALTH_SIZE`] bytes. The layout mirrors the board
//! firmware and must not be reordered.

use crate::board::error::BoardError;
use bytes::Buf;
use serde::{Deserialize, Serialize};

/// Size of the report on the wire: two u32 fields plus five u8 flags.
pub const HEALTH_SIZE: usize = 13;

/// Decoded board health report.
///
/// `started_alt` is part of the wire struct and is carried through to the
/// published envelope rather than being dropped by the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub voltage_mv: u32,
    pub current_ma: u32,
    pub ignition_started: bool,
    pub controls_allowed: bool,
    pub gas_interceptor_detected: bool,
    pub started_signal_detected: bool,
    pub started_alt: u8,
}

impl HealthReport {
    /// Unpack the 13-byte wire form.
    pub fn unpack(raw: &[u8]) -> Result<Self, BoardError> {
        if raw.len() < HEALTH_SIZE {
            return Err(BoardError::ShortHealthRead {
                expected: HEALTH_SIZE,
                actual: raw.len(),
            });
        }
        let mut cur = raw;
        Ok(Self {
            voltage_mv: cur.get_u32_le(),
            current_ma: cur.get_u32_le(),
            ignition_started: cur.get_u8() != 0,
            controls_allowed: cur.get_u8() != 0,
            gas_interceptor_detected: cur.get_u8() != 0,
            started_signal_detected: cur.get_u8() != 0,
            started_alt: cur.get_u8(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_layout() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&12_600u32.to_le_bytes()); // 12.6 V
        raw.extend_from_slice(&480u32.to_le_bytes()); // 480 mA
        raw.extend_from_slice(&[1, 1, 0, 1, 7]);

        let report = HealthReport::unpack(&raw).unwrap();
        assert_eq!(report.voltage_mv, 12_600);
        assert_eq!(report.current_ma, 480);
        assert!(report.ignition_started);
        assert!(report.controls_allowed);
        assert!(!report.gas_interceptor_detected);
        assert!(report.started_signal_detected);
        assert_eq!(report.started_alt, 7);
    }

    #[test]
    fn test_unpack_rejects_short_read() {
        let err = HealthReport::unpack(&[0u8; 12]).unwrap_err();
        assert!(matches!(
            err,
            BoardError::ShortHealthRead {
                expected: HEALTH_SIZE,
                actual: 12
            }
        ));
    }

    #[test]
    fn test_nonzero_flags_are_true() {
        let mut raw = vec![0u8; HEALTH_SIZE];
        raw[8] = 0xFF; // any nonzero byte counts as started
        let report = HealthReport::unpack(&raw).unwrap();
        assert!(report.ignition_started);
        assert!(!report.controls_allowed);
    }
}
