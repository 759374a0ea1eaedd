//! USB identity and vendor request constants for the board.
//!
//! Collected here so no magic numbers leak into transfer call sites.

use std::time::Duration;

/// Vendor/product identity the board enumerates with.
pub const BOARD_VID: u16 = 0xbbaa;
pub const BOARD_PID: u16 = 0xddcc;

/// The board exposes a single configuration and interface.
pub const BOARD_CONFIGURATION: u8 = 1;
pub const BOARD_INTERFACE: u8 = 0;

/// Bulk IN endpoint delivering observed CAN frames.
pub const ENDPOINT_CAN_IN: u8 = 0x81;
/// Bulk OUT endpoint accepting frames to transmit.
pub const ENDPOINT_CAN_OUT: u8 = 0x03;

/// Bulk IN read size: double the board FIFO.
pub const RECV_SIZE: usize = 0x1000;

/// Vendor requests (`wIndex` is always 0, no data stage unless noted).
pub const REQ_SET_SAFETY_MODEL: u8 = 0xDC; // host->dev, wValue = safety code
pub const REQ_READ_HEALTH: u8 = 0xD2; // dev->host, 13-byte report
pub const REQ_SET_FAN_SPEED: u8 = 0xD3; // wValue = fan speed
pub const REQ_AUX_POWER_OFF: u8 = 0xD9; // power off the auxiliary co-processor
pub const REQ_CAN_LOOPBACK: u8 = 0xE5; // wValue = 1 enables bulk self-routing
pub const REQ_ENABLE_CHARGING: u8 = 0xE6; // wValue = 1

/// Transfer timeout. Zero means unbounded in libusb; cycle pacing is done
/// with explicit sleeps in the pumps, never with USB timeouts.
pub const TRANSFER_TIMEOUT: Duration = Duration::ZERO;

/// Backoff between reconnect attempts after a lost device.
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(100);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_directions() {
        // bit 7 is the IN direction flag
        assert_eq!(ENDPOINT_CAN_IN & 0x80, 0x80);
        assert_eq!(ENDPOINT_CAN_OUT & 0x80, 0);
    }

    #[test]
    fn test_request_constants() {
        assert_eq!(REQ_SET_SAFETY_MODEL, 0xDC);
        assert_eq!(REQ_READ_HEALTH, 0xD2);
        assert_eq!(REQ_SET_FAN_SPEED, 0xD3);
        assert_eq!(REQ_AUX_POWER_OFF, 0xD9);
        assert_eq!(REQ_CAN_LOOPBACK, 0xE5);
        assert_eq!(REQ_ENABLE_CHARGING, 0xE6);
    }
}
