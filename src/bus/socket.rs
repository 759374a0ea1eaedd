//! Loopback TCP publish/subscribe plumbing.
//!
//! The publisher binds and fans framed events out to whoever is connected;
//! slow or dead subscribers are dropped rather than allowed to stall a
//! pump. The subscriber connects lazily, reassembles events from the byte
//! stream, and transparently reconnects after any stream error.

use crate::bus::envelope::{BusError, Event, FrameBuffer, encode_frame};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Write timeout per subscriber; one that cannot drain in this window is
/// considered dead and dropped.
const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause before retrying a failed subscriber connect.
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// Publishing side of one bus topic.
pub struct Publisher {
    listener: TcpListener,
    subscribers: Vec<TcpStream>,
}

impl Publisher {
    /// Bind the topic on loopback. Port 0 picks an ephemeral port (tests).
    pub fn bind(port: u16) -> Result<Self, BusError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            subscribers: Vec::new(),
        })
    }

    /// The actually bound port.
    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Frame and fan one event out to every live subscriber.
    ///
    /// Publishing with no subscribers is not an error; the event is simply
    /// not observable, same as any pub/sub bus.
    pub fn publish(&mut self, event: &Event) -> Result<(), BusError> {
        self.accept_pending();
        if self.subscribers.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(event)?;
        self.subscribers.retain_mut(|stream| {
            match stream.write_all(&frame) {
                Ok(()) => true,
                Err(e) => {
                    debug!("dropping bus subscriber: {}", e);
                    false
                }
            }
        });
        Ok(())
    }

    /// Accept any subscribers that connected since the last publish.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    // accepted sockets must not inherit the listener's
                    // non-blocking mode; writes rely on the timeout below
                    if let Err(e) = stream
                        .set_nonblocking(false)
                        .and_then(|_| stream.set_nodelay(true))
                        .and_then(|_| stream.set_write_timeout(Some(SUBSCRIBER_WRITE_TIMEOUT)))
                    {
                        warn!("rejecting bus subscriber {}: {}", addr, e);
                        continue;
                    }
                    trace!("bus subscriber connected from {}", addr);
                    self.subscribers.push(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("bus accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

/// Subscribing side of one bus topic.
pub struct Subscriber {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    buffer: FrameBuffer,
}

impl Subscriber {
    /// Subscriber for a loopback topic. No I/O happens until the first
    /// `recv_timeout`.
    pub fn connect(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            stream: None,
            buffer: FrameBuffer::new(),
        }
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// `None` covers every transient condition: nothing published yet,
    /// publisher not up, connection lost (a reconnect is attempted on the
    /// next call). Callers poll this in a loop and check their exit flag
    /// between calls.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Event> {
        // a zero read timeout would mean "no timeout" to the OS
        let timeout = timeout.max(Duration::from_millis(1));

        // a previous read may have buffered more than one event
        match self.buffer.next_event() {
            Ok(Some(event)) => return Some(event),
            Ok(None) => {}
            Err(e) => {
                warn!("corrupt bus stream, reconnecting: {}", e);
                self.reset();
                return None;
            }
        }

        if !self.ensure_connected(timeout) {
            return None;
        }

        let mut chunk = [0u8; 4096];
        let read = match self.stream.as_mut() {
            Some(stream) => stream
                .set_read_timeout(Some(timeout))
                .and_then(|_| stream.read(&mut chunk)),
            None => return None,
        };

        match read {
            Ok(0) => {
                debug!("bus publisher closed the connection");
                self.reset();
                None
            }
            Ok(n) => {
                self.buffer.extend(&chunk[..n]);
                match self.buffer.next_event() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("corrupt bus stream, reconnecting: {}", e);
                        self.reset();
                        None
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                None
            }
            Err(e) => {
                debug!("bus read failed, reconnecting: {}", e);
                self.reset();
                None
            }
        }
    }

    /// Connect if not already connected, pacing failed attempts.
    fn ensure_connected(&mut self, timeout: Duration) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match TcpStream::connect_timeout(&self.addr, CONNECT_BACKOFF.max(timeout)) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                trace!("subscribed to bus topic at {}", self.addr);
                self.stream = Some(stream);
                true
            }
            Err(_) => {
                // publisher not up yet; pace the retries
                std::thread::sleep(CONNECT_BACKOFF.min(timeout));
                false
            }
        }
    }

    fn reset(&mut self) {
        self.stream = None;
        self.buffer.clear();
    }
}
