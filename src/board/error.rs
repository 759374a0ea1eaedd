//! Board link error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoardError {
    /// USB error from rusb.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// No device with the board's vendor/product identity is attached.
    #[error("board not found (0x{vid:04x}:0x{pid:04x})")]
    NotFound { vid: u16, pid: u16 },

    /// Health report came back with the wrong size.
    #[error("short health read: {actual} bytes (expected {expected})")]
    ShortHealthRead { expected: usize, actual: usize },

    /// Bulk OUT transferred fewer bytes than requested.
    #[error("partial bulk write: {sent} of {expected} bytes")]
    PartialWrite { expected: usize, sent: usize },
}

impl BoardError {
    /// Errors that mean the device is gone and the handle must be reopened.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BoardError::Usb(rusb::Error::NoDevice))
    }

    /// Transfer timed out; for bulk IN this is an empty cycle, not a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BoardError::Usb(rusb::Error::Timeout))
    }

    /// Kernel reported more data than the buffer could take.
    pub fn is_overflow(&self) -> bool {
        matches!(self, BoardError::Usb(rusb::Error::Overflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(BoardError::Usb(rusb::Error::NoDevice).is_disconnect());
        assert!(!BoardError::Usb(rusb::Error::Timeout).is_disconnect());
        assert!(
            !BoardError::NotFound {
                vid: 0xbbaa,
                pid: 0xddcc
            }
            .is_disconnect()
        );
    }

    #[test]
    fn test_timeout_classification() {
        assert!(BoardError::Usb(rusb::Error::Timeout).is_timeout());
        assert!(!BoardError::Usb(rusb::Error::Io).is_timeout());
    }

    #[test]
    fn test_overflow_classification() {
        assert!(BoardError::Usb(rusb::Error::Overflow).is_overflow());
        assert!(!BoardError::Usb(rusb::Error::Pipe).is_overflow());
    }

    #[test]
    fn test_display() {
        let err = BoardError::ShortHealthRead {
            expected: 13,
            actual: 4,
        };
        assert!(err.to_string().contains("13"));
        assert!(err.to_string().contains("4"));

        let err = BoardError::PartialWrite {
            expected: 32,
            sent: 16,
        };
        assert!(err.to_string().contains("16 of 32"));
    }
}
