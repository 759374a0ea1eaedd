//! The pump loops.
//!
//! Four long-running workers, each bound to one bus endpoint and the shared
//! board link:
//!
//! - receive pump: bulk IN at ~200 Hz, publishes decoded frame batches
//! - send pump: drains outgoing frame batches, bulk OUT
//! - health pump: 1 Hz health poll, publishes the report
//! - fan pump: reactive fan-setpoint pass-through
//!
//! Every loop checks the shared exit flag at its head and never holds the
//! USB mutex across bus I/O (the link releases it before returning).

use crate::board::BoardIo;
use crate::bus::envelope::{Event, EventData};
use crate::bus::socket::{Publisher, Subscriber};
use crate::can::wire;
use crate::config::BridgeConfig;
use crate::util::LogThrottle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Receive pump cycle pacing (~200 Hz).
const RECV_CYCLE: Duration = Duration::from_millis(5);

/// Health poll period.
const HEALTH_PERIOD: Duration = Duration::from_secs(1);

/// Subscription poll granularity; bounds how long a reactive pump takes to
/// notice the exit flag.
const SUB_POLL: Duration = Duration::from_millis(100);

/// Bulk-read CAN frames from the board and publish them.
pub fn can_recv_loop<B: BoardIo>(board: &B, publisher: &mut Publisher, do_exit: &AtomicBool) {
    debug!("start receive pump");
    let publish_errors = LogThrottle::new(100);

    while !do_exit.load(Ordering::Relaxed) {
        match board.can_recv() {
            Ok(payload) if !payload.is_empty() => {
                let frames = wire::decode_batch(&payload);
                if !frames.is_empty() {
                    let event = Event::new(EventData::Can { frames });
                    if let Err(e) = publisher.publish(&event)
                        && let Some(n) = publish_errors.tick()
                    {
                        warn!("can publish failed ({} so far): {}", n, e);
                    }
                }
            }
            // empty payload: the cycle timed out with nothing to deliver
            Ok(_) => {}
            Err(e) => warn!("receive pump usb failure: {}", e),
        }
        thread::sleep(RECV_CYCLE);
    }
    debug!("receive pump exiting");
}

/// Drain outgoing frame batches and deliver them to the board.
///
/// With `fake_send` set the subscription is still drained and encoded, but
/// the bulk write is suppressed.
pub fn can_send_loop<B: BoardIo>(
    board: &B,
    subscriber: &mut Subscriber,
    config: &BridgeConfig,
    do_exit: &AtomicBool,
) {
    debug!("start send pump");

    while !do_exit.load(Ordering::Relaxed) {
        let Some(event) = subscriber.recv_timeout(SUB_POLL) else {
            continue;
        };
        let EventData::Sendcan { frames } = event.data else {
            trace!("send pump ignoring non-sendcan envelope");
            continue;
        };
        // the frame count comes from the sendcan batch itself
        let chunk = wire::encode_batch(&frames);
        if chunk.is_empty() {
            continue;
        }
        if config.fake_send {
            trace!("fake send: suppressing {} byte bulk write", chunk.len());
        } else if let Err(e) = board.can_send(&chunk) {
            warn!("send pump usb failure: {}", e);
        }
    }
    debug!("send pump exiting");
}

/// Poll board health at 1 Hz and publish it.
pub fn health_loop<B: BoardIo>(
    board: &B,
    publisher: &mut Publisher,
    config: &BridgeConfig,
    do_exit: &AtomicBool,
) {
    debug!("start health pump");
    let publish_errors = LogThrottle::new(100);

    while !do_exit.load(Ordering::Relaxed) {
        match board.read_health() {
            Ok(mut report) => {
                if config.spoofing_started {
                    report.ignition_started = true;
                }
                let event = Event::new(EventData::Health(report));
                if let Err(e) = publisher.publish(&event)
                    && let Some(n) = publish_errors.tick()
                {
                    warn!("health publish failed ({} so far): {}", n, e);
                }
            }
            Err(e) => warn!("health pump usb failure: {}", e),
        }
        thread::sleep(HEALTH_PERIOD);
    }
    debug!("health pump exiting");
}

/// Forward fan setpoints from the thermal topic to the board. Stops the
/// fan on the way out.
pub fn fan_loop<B: BoardIo>(board: &B, subscriber: &mut Subscriber, do_exit: &AtomicBool) {
    debug!("start fan pump");

    while !do_exit.load(Ordering::Relaxed) {
        let Some(event) = subscriber.recv_timeout(SUB_POLL) else {
            continue;
        };
        if let EventData::Thermal { fan_speed } = event.data {
            if let Err(e) = board.set_fan_speed(fan_speed) {
                warn!("fan pump usb failure: {}", e);
            }
        } else {
            trace!("fan pump ignoring non-thermal envelope");
        }
    }

    // leave the fan stopped when the bridge goes away
    if let Err(e) = board.set_fan_speed(0) {
        warn!("failed to stop fan on exit: {}", e);
    }
    debug!("fan pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::error::BoardError;
    use crate::board::health::HealthReport;
    use crate::can::CanFrame;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Instant;

    /// Scripted board: replays a fixed bulk-IN payload and records
    /// everything written to it.
    #[derive(Default)]
    struct MockBoard {
        recv_payload: Mutex<Vec<u8>>,
        sent_chunks: Mutex<Vec<Vec<u8>>>,
        fan_speeds: Mutex<Vec<u16>>,
        health: Mutex<HealthReport>,
    }

    impl BoardIo for MockBoard {
        fn can_recv(&self) -> Result<Vec<u8>, BoardError> {
            Ok(self.recv_payload.lock().clone())
        }
        fn can_send(&self, chunk: &[u8]) -> Result<(), BoardError> {
            self.sent_chunks.lock().push(chunk.to_vec());
            Ok(())
        }
        fn read_health(&self) -> Result<HealthReport, BoardError> {
            Ok(*self.health.lock())
        }
        fn set_fan_speed(&self, speed: u16) -> Result<(), BoardError> {
            self.fan_speeds.lock().push(speed);
            Ok(())
        }
        fn set_safety_model(&self, _code: u16) -> Result<(), BoardError> {
            Ok(())
        }
    }

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn test_recv_pump_publishes_decoded_batches() {
        let frames = vec![
            CanFrame::new_standard(0x7E8, 0, &[0x02, 0x01, 0x0C]),
            CanFrame::new_extended(0x18DA_F110, 2, &[]),
        ];
        let board = Arc::new(MockBoard::default());
        *board.recv_payload.lock() = wire::encode_batch(&frames).to_vec();

        let mut publisher = Publisher::bind(0).unwrap();
        let mut subscriber = Subscriber::connect(publisher.port());
        let do_exit = Arc::new(AtomicBool::new(false));

        let pump = {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            thread::spawn(move || can_recv_loop(board.as_ref(), &mut publisher, &do_exit))
        };

        let mut received = None;
        wait_until(3000, || {
            received = subscriber.recv_timeout(Duration::from_millis(20));
            received.is_some()
        });
        do_exit.store(true, Ordering::Relaxed);
        pump.join().unwrap();

        let event = received.expect("receive pump should publish frames");
        match event.data {
            EventData::Can {
                frames: ref published,
            } => assert_eq!(published, &frames),
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn test_send_pump_writes_whole_batches_in_order() {
        let frames = vec![
            CanFrame::new_standard(0x200, 0, &[1]),
            CanFrame::new_standard(0x201, 1, &[2, 3]),
            CanFrame::new_extended(0x1ABC_DEF0, 2, &[4, 5, 6]),
        ];
        let board = Arc::new(MockBoard::default());
        let mut publisher = Publisher::bind(0).unwrap();
        let mut subscriber = Subscriber::connect(publisher.port());
        let do_exit = Arc::new(AtomicBool::new(false));

        let pump = {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            thread::spawn(move || {
                can_send_loop(
                    board.as_ref(),
                    &mut subscriber,
                    &BridgeConfig::default(),
                    &do_exit,
                )
            })
        };

        let event = Event {
            log_mono_time: 1,
            data: EventData::Sendcan {
                frames: frames.clone(),
            },
        };
        let delivered = wait_until(3000, || {
            publisher.publish(&event).unwrap();
            !board.sent_chunks.lock().is_empty()
        });
        do_exit.store(true, Ordering::Relaxed);
        pump.join().unwrap();
        assert!(delivered, "send pump should have written a batch");

        let sent = board.sent_chunks.lock();
        // every bulk write is a whole batch: a multiple of 16 bytes, frames
        // in envelope order
        assert_eq!(sent[0].len() % wire::FRAME_SIZE, 0);
        assert_eq!(sent[0].len(), frames.len() * wire::FRAME_SIZE);
        assert_eq!(wire::decode_batch(&sent[0]), frames);
    }

    #[test]
    fn test_send_pump_fake_send_drains_without_writing() {
        let board = Arc::new(MockBoard::default());
        let mut publisher = Publisher::bind(0).unwrap();
        let mut subscriber = Subscriber::connect(publisher.port());
        let do_exit = Arc::new(AtomicBool::new(false));
        let config = BridgeConfig {
            fake_send: true,
            ..Default::default()
        };

        let pump = {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            thread::spawn(move || can_send_loop(board.as_ref(), &mut subscriber, &config, &do_exit))
        };

        let event = Event {
            log_mono_time: 1,
            data: EventData::Sendcan {
                frames: vec![CanFrame::new_standard(0x123, 0, &[9]); 3],
            },
        };
        // wait for the subscription to be live, then keep feeding it
        wait_until(3000, || {
            publisher.publish(&event).unwrap();
            publisher.subscriber_count() == 1
        });
        for _ in 0..10 {
            publisher.publish(&event).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        do_exit.store(true, Ordering::Relaxed);
        pump.join().unwrap();

        // the subscription drained (connection stayed up) but nothing was
        // written to the board
        assert!(board.sent_chunks.lock().is_empty());
    }

    #[test]
    fn test_health_pump_spoofs_ignition_only() {
        let board = Arc::new(MockBoard::default());
        *board.health.lock() = HealthReport {
            voltage_mv: 11_900,
            current_ma: 250,
            ignition_started: false,
            controls_allowed: true,
            gas_interceptor_detected: true,
            started_signal_detected: false,
            started_alt: 5,
        };
        let mut publisher = Publisher::bind(0).unwrap();
        let mut subscriber = Subscriber::connect(publisher.port());
        let do_exit = Arc::new(AtomicBool::new(false));
        let config = BridgeConfig {
            spoofing_started: true,
            ..Default::default()
        };

        let pump = {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            thread::spawn(move || health_loop(board.as_ref(), &mut publisher, &config, &do_exit))
        };

        let mut received = None;
        wait_until(3500, || {
            received = subscriber.recv_timeout(Duration::from_millis(50));
            received.is_some()
        });
        do_exit.store(true, Ordering::Relaxed);
        pump.join().unwrap();

        let event = received.expect("health pump should publish a report");
        match event.data {
            EventData::Health(report) => {
                // spoofed field
                assert!(report.ignition_started);
                // everything else verbatim
                assert_eq!(report.voltage_mv, 11_900);
                assert_eq!(report.current_ma, 250);
                assert!(report.controls_allowed);
                assert!(report.gas_interceptor_detected);
                assert!(!report.started_signal_detected);
                assert_eq!(report.started_alt, 5);
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn test_fan_pump_forwards_setpoint_and_stops_on_exit() {
        let board = Arc::new(MockBoard::default());
        let mut publisher = Publisher::bind(0).unwrap();
        let mut subscriber = Subscriber::connect(publisher.port());
        let do_exit = Arc::new(AtomicBool::new(false));

        let pump = {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            thread::spawn(move || fan_loop(board.as_ref(), &mut subscriber, &do_exit))
        };

        let event = Event {
            log_mono_time: 1,
            data: EventData::Thermal { fan_speed: 3000 },
        };
        let forwarded = wait_until(3000, || {
            publisher.publish(&event).unwrap();
            !board.fan_speeds.lock().is_empty()
        });
        do_exit.store(true, Ordering::Relaxed);
        pump.join().unwrap();
        assert!(forwarded, "fan pump should forward the setpoint");

        let speeds = board.fan_speeds.lock();
        assert!(speeds.contains(&3000));
        // shutdown always parks the fan
        assert_eq!(*speeds.last().unwrap(), 0);
    }

    #[test]
    fn test_recv_pump_stays_quiet_on_empty_cycles() {
        let board = Arc::new(MockBoard::default()); // always times out empty
        let mut publisher = Publisher::bind(0).unwrap();
        let mut subscriber = Subscriber::connect(publisher.port());
        let do_exit = Arc::new(AtomicBool::new(false));

        let pump = {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            thread::spawn(move || can_recv_loop(board.as_ref(), &mut publisher, &do_exit))
        };

        // nothing may arrive, ever
        for _ in 0..10 {
            assert!(subscriber.recv_timeout(Duration::from_millis(20)).is_none());
        }
        do_exit.store(true, Ordering::Relaxed);
        pump.join().unwrap();
    }
}
