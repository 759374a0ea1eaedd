//! Message-bus endpoints.
//!
//! The bus itself is loopback TCP publish/subscribe; this module carries the
//! envelope shapes the bridge reads and writes and the socket plumbing to
//! move them.

pub mod envelope;
pub mod socket;

pub use envelope::{BusError, Event, EventData};
pub use socket::{Publisher, Subscriber};

/// Publish: CAN frames observed by the board.
pub const PORT_CAN: u16 = 8006;
/// Publish: board health reports.
pub const PORT_HEALTH: u16 = 8011;
/// Subscribe: actuator CAN frames to transmit.
pub const PORT_SENDCAN: u16 = 8017;
/// Subscribe: thermal daemon messages carrying the fan setpoint.
pub const PORT_THERMAL: u16 = 8005;
