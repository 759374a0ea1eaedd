//! canbridge - userspace bridge between a USB vehicle-control board and the
//! message bus.
//!
//! Two streams of small, latency-sensitive messages move in opposite
//! directions: CAN frames observed by the board are published to the bus,
//! and actuator frames produced by the driving stack are delivered to the
//! board for transmission on the vehicle network. Alongside, the bridge
//! polls a compact board-health report, passes a fan setpoint through, and
//! arms a vehicle-specific safety policy on the board exactly once before
//! any actuation is possible.
//!
//! # Architecture
//!
//! - `board`: the USB link - one serialized device handle, reconnect policy
//! - `can`: structured frames and the 16-byte board wire codec
//! - `safety`: safety models and the one-shot arming gate
//! - `bus`: envelope shapes and loopback TCP publish/subscribe
//! - `bridge`: the four pump loops the supervisor spawns

pub mod board;
pub mod bridge;
pub mod bus;
pub mod can;
pub mod clock;
pub mod config;
pub mod params;
pub mod safety;
pub(crate) mod util;

pub use board::{BoardIo, BoardLink};
pub use can::CanFrame;
pub use config::BridgeConfig;
