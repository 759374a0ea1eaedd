//! Bus envelopes and stream framing.
//!
//! Every message on the bus is an [`Event`]: a monotonic timestamp stamped
//! at emission plus one of the three payload shapes this bridge knows. On
//! the stream each event is framed as a 4-byte little-endian length prefix
//! followed by the JSON payload; the prefix is what lets a subscriber
//! reassemble events from arbitrary TCP read boundaries.

use crate::board::health::HealthReport;
use crate::can::CanFrame;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length-prefix size on the wire.
pub const HEADER_SIZE: usize = 4;

/// Upper bound on a single framed event; anything larger is a corrupt
/// stream, not a real message.
pub const MAX_FRAME: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("envelope serialization failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("framed event of {0} bytes exceeds the {MAX_FRAME} byte limit")]
    FrameTooLarge(usize),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// One bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic nanoseconds since process start, stamped at emission.
    pub log_mono_time: u64,
    pub data: EventData,
}

/// The three payload shapes this bridge reads or writes.
///
/// `Can` is what the receive pump publishes; `Sendcan` is what the send
/// pump consumes. They are deliberately distinct variants so the two
/// directions cannot be conflated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventData {
    Can { frames: Vec<CanFrame> },
    Sendcan { frames: Vec<CanFrame> },
    Health(HealthReport),
    Thermal { fan_speed: u16 },
}

impl Event {
    pub fn new(data: EventData) -> Self {
        Self {
            log_mono_time: crate::clock::monotonic_nanos(),
            data,
        }
    }
}

/// Serialize one event into its framed wire form.
pub fn encode_frame(event: &Event) -> Result<Vec<u8>, BusError> {
    let payload = serde_json::to_vec(event)?;
    if payload.len() > MAX_FRAME {
        return Err(BusError::FrameTooLarge(payload.len()));
    }
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(&payload);
    Ok(frame.to_vec())
}

/// Reassembles framed events from arbitrary read boundaries.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw stream bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Pop the next complete event, if one is buffered.
    ///
    /// An error means the stream is corrupt (oversized length prefix or
    /// undecodable payload); the caller should drop the connection and this
    /// buffer with it.
    pub fn next_event(&mut self) -> Result<Option<Event>, BusError> {
        if self.pending.len() < HEADER_SIZE {
            return Ok(None);
        }
        let len = (&self.pending[..HEADER_SIZE]).get_u32_le() as usize;
        if len > MAX_FRAME {
            return Err(BusError::FrameTooLarge(len));
        }
        if self.pending.len() < HEADER_SIZE + len {
            return Ok(None);
        }
        self.pending.advance(HEADER_SIZE);
        let payload = self.pending.split_to(len);
        let event = serde_json::from_slice(&payload)?;
        Ok(Some(event))
    }

    /// Drop any partial data (used when a connection is abandoned).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
