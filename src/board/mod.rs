//! The USB link: one serialized handle shared by every pump.
//!
//! `BoardLink` exclusively owns the device handle behind a mutex. Every
//! control and bulk transfer goes through it, at most one in flight at any
//! moment. A transfer that hits a disconnect reopens and rearms the device
//! under the same lock before returning, so the other pumps simply observe
//! a fresh handle the next time they acquire the mutex.

pub mod device;
pub mod error;
pub mod health;
pub mod protocol;

use crate::board::device::BoardDevice;
use crate::board::error::BoardError;
use crate::board::health::{HEALTH_SIZE, HealthReport};
use crate::board::protocol::*;
use crate::config::BridgeConfig;
use crate::params::Params;
use crate::safety;
use crate::util::LogThrottle;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{error, info, warn};

/// The operations the pumps and the safety gate need from the board.
///
/// `BoardLink` is the production implementation; tests substitute mocks at
/// this seam.
pub trait BoardIo: Send + Sync {
    /// One bulk IN cycle. Empty result means the cycle timed out with no
    /// data, which is not an error.
    fn can_recv(&self) -> Result<Vec<u8>, BoardError>;

    /// Write one contiguous chunk of wire frames, whole. Retries until the
    /// full chunk is accepted.
    fn can_send(&self, chunk: &[u8]) -> Result<(), BoardError>;

    /// Poll the health report, retrying until the full 13 bytes arrive.
    fn read_health(&self) -> Result<HealthReport, BoardError>;

    /// Forward a fan setpoint. Fire-and-forget.
    fn set_fan_speed(&self, speed: u16) -> Result<(), BoardError>;

    /// Program the board's safety model selector.
    fn set_safety_model(&self, code: u16) -> Result<(), BoardError>;
}

/// Everything guarded by the device mutex.
///
/// `gate_started` and `armed_code` live here so gate completion and
/// reconnect arming cannot race.
struct Session {
    device: BoardDevice,
    /// Safety code applied by the gate, if it has run. Re-applied during
    /// the reconnect arming sequence.
    armed_code: Option<u16>,
    /// The safety gate is spawned at most once per process.
    gate_started: bool,
}

/// Serialized access to the board.
pub struct BoardLink {
    session: Mutex<Session>,
    loopback: bool,
    do_exit: Arc<AtomicBool>,
    usb_errors: LogThrottle,
}

impl BoardLink {
    /// Connect to the board, retrying indefinitely, then spawn the safety
    /// gate. Returns `None` only when the exit flag was raised before a
    /// device appeared.
    pub fn connect(
        config: &BridgeConfig,
        params: Params,
        do_exit: Arc<AtomicBool>,
    ) -> Option<Arc<Self>> {
        info!("attempting to connect to board");
        let attempt_throttle = LogThrottle::new(100);
        let device = loop {
            if do_exit.load(Ordering::Relaxed) {
                return None;
            }
            match BoardDevice::open(config.loopback_can, None) {
                Ok(device) => break device,
                Err(e) => {
                    if let Some(n) = attempt_throttle.tick() {
                        warn!("board open failed ({} attempts): {}", n, e);
                    }
                    thread::sleep(RECONNECT_BACKOFF);
                }
            }
        };
        info!("connected to board");

        let link = Arc::new(Self {
            session: Mutex::new(Session {
                device,
                armed_code: None,
                gate_started: false,
            }),
            loopback: config.loopback_can,
            do_exit,
            usb_errors: LogThrottle::new(100),
        });
        link.spawn_safety_gate(params);
        Some(link)
    }

    /// Spawn the one-shot safety gate if it is not already running. Never
    /// re-spawned for the life of the process, reconnects included.
    fn spawn_safety_gate(self: &Arc<Self>, params: Params) {
        let mut session = self.session.lock();
        if session.gate_started {
            return;
        }
        session.gate_started = true;
        drop(session);

        let link = Arc::clone(self);
        let do_exit = Arc::clone(&self.do_exit);
        // detached; the gate exits on its own or with the process
        let spawned = thread::Builder::new()
            .name("safety-gate".into())
            .spawn(move || safety::safety_gate_loop(link.as_ref(), &params, &do_exit));
        if let Err(e) = spawned {
            // the board stays in no_output until a gate runs
            error!("failed to spawn safety gate: {}", e);
        }
    }

    /// Log a transfer failure at a throttled rate and reconnect in place if
    /// the device is gone.
    fn handle_usb_issue(&self, session: &mut Session, err: &BoardError, op: &str) {
        if let Some(n) = self.usb_errors.tick() {
            warn!("usb error in {} ({} so far): {}", op, n, err);
        }
        if err.is_disconnect() {
            error!("lost connection in {}", op);
            self.reconnect(session);
        }
    }

    /// Close and reopen the handle with backoff until it arms again.
    ///
    /// Runs under the session lock, so every other pump blocks on the mutex
    /// until the fresh handle is in place. A previously armed safety code
    /// is restored by the open sequence.
    fn reconnect(&self, session: &mut Session) {
        let attempt_throttle = LogThrottle::new(100);
        loop {
            if self.do_exit.load(Ordering::Relaxed) {
                return;
            }
            match BoardDevice::open(self.loopback, session.armed_code) {
                Ok(device) => {
                    session.device = device;
                    info!("reconnected to board");
                    return;
                }
                Err(e) => {
                    if let Some(n) = attempt_throttle.tick() {
                        warn!("board reopen failed ({} attempts): {}", n, e);
                    }
                    thread::sleep(RECONNECT_BACKOFF);
                }
            }
        }
    }

    fn exiting(&self) -> bool {
        self.do_exit.load(Ordering::Relaxed)
    }
}

impl BoardIo for BoardLink {
    fn can_recv(&self) -> Result<Vec<u8>, BoardError> {
        let mut buf = vec![0u8; RECV_SIZE];
        let mut session = self.session.lock();
        loop {
            match session.device.bulk_read(ENDPOINT_CAN_IN, &mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(e) if e.is_timeout() => {
                    // timeout is an empty cycle, not a failure
                    return Ok(Vec::new());
                }
                Err(e) if e.is_overflow() => {
                    // rusb does not expose the partial byte count on error,
                    // so the transfer is reissued
                    if let Some(n) = self.usb_errors.tick() {
                        warn!("bulk IN overflow ({} usb errors so far)", n);
                    }
                }
                Err(e) => {
                    self.handle_usb_issue(&mut session, &e, "can_recv");
                    if self.exiting() {
                        return Err(e);
                    }
                }
            }
        }
    }

    fn can_send(&self, chunk: &[u8]) -> Result<(), BoardError> {
        let mut session = self.session.lock();
        loop {
            match session.device.bulk_write(ENDPOINT_CAN_OUT, chunk) {
                Ok(sent) if sent == chunk.len() => return Ok(()),
                Ok(sent) => {
                    // the wire protocol has no resume semantics; retry whole
                    let e = BoardError::PartialWrite {
                        expected: chunk.len(),
                        sent,
                    };
                    self.handle_usb_issue(&mut session, &e, "can_send");
                }
                Err(e) => {
                    self.handle_usb_issue(&mut session, &e, "can_send");
                    if self.exiting() {
                        return Err(e);
                    }
                }
            }
        }
    }

    fn read_health(&self) -> Result<HealthReport, BoardError> {
        let mut raw = [0u8; HEALTH_SIZE];
        let mut session = self.session.lock();
        loop {
            match session.device.control_read(REQ_READ_HEALTH, 0, &mut raw) {
                Ok(n) if n == HEALTH_SIZE => return HealthReport::unpack(&raw),
                Ok(n) => {
                    let e = BoardError::ShortHealthRead {
                        expected: HEALTH_SIZE,
                        actual: n,
                    };
                    self.handle_usb_issue(&mut session, &e, "read_health");
                }
                Err(e) => {
                    self.handle_usb_issue(&mut session, &e, "read_health");
                }
            }
            if self.exiting() {
                return Err(BoardError::Usb(rusb::Error::Interrupted));
            }
        }
    }

    fn set_fan_speed(&self, speed: u16) -> Result<(), BoardError> {
        let mut session = self.session.lock();
        loop {
            match session.device.vendor_command(REQ_SET_FAN_SPEED, speed) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_disconnect() => {
                    self.handle_usb_issue(&mut session, &e, "set_fan_speed");
                    if self.exiting() {
                        return Err(e);
                    }
                }
                Err(e) => {
                    // fire-and-forget; a dropped setpoint is replaced by the
                    // next thermal message
                    if let Some(n) = self.usb_errors.tick() {
                        warn!("fan setpoint dropped ({} usb errors so far): {}", n, e);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn set_safety_model(&self, code: u16) -> Result<(), BoardError> {
        debug_assert!(
            safety::is_valid_safety_code(code),
            "unmapped safety code 0x{:x}",
            code
        );
        let mut session = self.session.lock();
        loop {
            match session.device.set_safety_code(code) {
                Ok(()) => {
                    session.armed_code = Some(code);
                    return Ok(());
                }
                Err(e) => {
                    self.handle_usb_issue(&mut session, &e, "set_safety_model");
                    if self.exiting() {
                        return Err(e);
                    }
                }
            }
        }
    }
}
