//! Low-level USB access to the board.
//!
//! `BoardDevice` wraps the rusb handle and performs the fixed arming
//! sequence on open. It knows nothing about retries or reconnection; that
//! policy lives in [`crate::board::BoardLink`].

use crate::board::error::BoardError;
use crate::board::protocol::*;
use rusb::{Direction, GlobalContext, Recipient, RequestType};
use tracing::{debug, info, warn};

/// An open, configured and safety-disarmed board handle.
pub struct BoardDevice {
    handle: rusb::DeviceHandle<GlobalContext>,
    interface_claimed: bool,
}

impl BoardDevice {
    /// Open the board by vendor/product identity and run the arming
    /// sequence.
    ///
    /// In order, under the caller's session lock:
    /// 1. open `0xbbaa:0xddcc` (absent device is an error, the caller owns
    ///    the retry policy)
    /// 2. set configuration 1, claim interface 0
    /// 3. enable device-side CAN loopback if requested
    /// 4. power off the auxiliary co-processor
    /// 5. enable charging (not on x86_64 hosts)
    /// 6. force the `no_output` safety model
    /// 7. re-apply `rearm_code` if a safety model was already armed in this
    ///    process (reconnect path; the board reboots into `no_output`)
    pub fn open(loopback: bool, rearm_code: Option<u16>) -> Result<Self, BoardError> {
        let mut handle = rusb::open_device_with_vid_pid(BOARD_VID, BOARD_PID).ok_or(
            BoardError::NotFound {
                vid: BOARD_VID,
                pid: BOARD_PID,
            },
        )?;

        // let libusb juggle any kernel driver for us; not supported on all
        // platforms, so best effort
        let _ = handle.set_auto_detach_kernel_driver(true);

        handle.set_active_configuration(BOARD_CONFIGURATION)?;
        handle.claim_interface(BOARD_INTERFACE)?;

        let mut device = Self {
            handle,
            interface_claimed: true,
        };

        if loopback {
            device.vendor_command(REQ_CAN_LOOPBACK, 1)?;
            debug!("device-side CAN loopback enabled");
        }

        device.vendor_command(REQ_AUX_POWER_OFF, 0)?;

        if cfg!(target_arch = "x86_64") {
            warn!("not enabling charging on x86_64");
        } else {
            device.vendor_command(REQ_ENABLE_CHARGING, 1)?;
        }

        // the board boots into no_output; make that explicit before anything
        // else touches it
        device.set_safety_code(0)?;

        if let Some(code) = rearm_code {
            device.set_safety_code(code)?;
            info!("restored safety code 0x{:x} after reopen", code);
        }

        Ok(device)
    }

    /// Vendor IN request with no data stage (the board treats these as
    /// commands; the direction bit is part of its protocol).
    pub fn vendor_command(&self, request: u8, value: u16) -> Result<(), BoardError> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        self.handle
            .read_control(request_type, request, value, 0, &mut [], TRANSFER_TIMEOUT)?;
        Ok(())
    }

    /// Vendor IN request reading a data stage into `buf`.
    pub fn control_read(&self, request: u8, value: u16, buf: &mut [u8]) -> Result<usize, BoardError> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        let n = self
            .handle
            .read_control(request_type, request, value, 0, buf, TRANSFER_TIMEOUT)?;
        Ok(n)
    }

    /// Vendor OUT request with no data stage.
    pub fn control_write(&self, request: u8, value: u16) -> Result<(), BoardError> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(request_type, request, value, 0, &[], TRANSFER_TIMEOUT)?;
        Ok(())
    }

    /// Write the safety model selector.
    pub fn set_safety_code(&self, code: u16) -> Result<(), BoardError> {
        self.control_write(REQ_SET_SAFETY_MODEL, code)
    }

    /// Bulk IN transfer; returns the byte count actually delivered.
    pub fn bulk_read(&self, endpoint: u8, buf: &mut [u8]) -> Result<usize, BoardError> {
        let n = self.handle.read_bulk(endpoint, buf, TRANSFER_TIMEOUT)?;
        Ok(n)
    }

    /// Bulk OUT transfer; returns the byte count actually accepted.
    pub fn bulk_write(&self, endpoint: u8, buf: &[u8]) -> Result<usize, BoardError> {
        let n = self.handle.write_bulk(endpoint, buf, TRANSFER_TIMEOUT)?;
        Ok(n)
    }
}

impl Drop for BoardDevice {
    fn drop(&mut self) {
        // hand the interface back to the OS; the device may already be gone,
        // so errors are expected here
        if self.interface_claimed {
            let _ = self.handle.release_interface(BOARD_INTERFACE);
            self.interface_claimed = false;
        }
    }
}
