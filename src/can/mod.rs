//! Structured CAN frames and the board wire codec.
//!
//! The bridge never interprets CAN payloads; frames pass through as opaque
//! `address + data` records tagged with the bus they belong to.

pub mod wire;

use serde::{Deserialize, Serialize};

/// A single CAN frame in structured form.
///
/// Invariants:
/// - `is_extended` implies `address < 2^29`, otherwise `address < 2^11`
/// - `len <= 8`; `data[len..]` is zero
///
/// `bus_time` is a 16-bit counter sampled by the board when the frame was
/// observed; it is zero for frames originating on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    pub address: u32,
    pub is_extended: bool,
    pub bus_time: u16,
    /// Which physical CAN bus on the board this frame was seen on or is
    /// destined for.
    pub src: u8,
    pub len: u8,
    pub data: [u8; 8],
}

impl CanFrame {
    /// Standard (11-bit) frame. Panics if `payload` exceeds 8 bytes; frames
    /// built from untrusted input go through the wire decoder instead.
    pub fn new_standard(address: u16, src: u8, payload: &[u8]) -> Self {
        assert!(payload.len() <= 8);
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Self {
            address: u32::from(address) & 0x7FF,
            is_extended: false,
            bus_time: 0,
            src,
            len: payload.len() as u8,
            data,
        }
    }

    /// Extended (29-bit) frame.
    pub fn new_extended(address: u32, src: u8, payload: &[u8]) -> Self {
        assert!(payload.len() <= 8);
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Self {
            address: address & 0x1FFF_FFFF,
            is_extended: true,
            bus_time: 0,
            src,
            len: payload.len() as u8,
            data,
        }
    }

    /// The `len` live payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(8))]
    }
}
