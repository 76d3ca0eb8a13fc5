//! UDP socket for MPEG-TS input over multicast or unicast.
//!
//! Mirrors the bind/reuse-address/read-timeout/buffer-size conventions
//! used for this pipeline's other UDP-based inputs: reuse-address so a
//! restarted source can rebind the same port immediately, a bounded read
//! timeout so the reader thread can observe its stop flag, and enlarged
//! recv buffers so a scheduling hiccup doesn't drop packets at the kernel
//! socket queue.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use ts_signal::{SignalBus, SignalKind};

/// MPEG-TS packets are fixed-size; most sources send one or seven packed
/// per UDP datagram.
pub const TS_PACKET_SIZE: usize = 188;

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;
/// Consecutive read timeouts before the socket is torn down and rebound.
const REOPEN_AFTER_TIMEOUTS: u32 = 3;

pub fn is_multicast(addr: &SocketAddrV4) -> bool {
    addr.ip().is_multicast()
}

/// A UDP source reader bound to one ingest address. Reopens itself after
/// three consecutive read timeouts rather than waiting indefinitely on a
/// source that has gone silent without tearing down cleanly.
pub struct UdpSourceReader {
    socket: UdpSocket,
    bind_addr: SocketAddrV4,
    consecutive_timeouts: u32,
    signal_bus: SignalBus,
}

impl UdpSourceReader {
    pub fn bind(bind_addr: SocketAddrV4, signal_bus: SignalBus) -> io::Result<Self> {
        let socket = Self::open(bind_addr)?;
        Ok(Self {
            socket,
            bind_addr,
            consecutive_timeouts: 0,
            signal_bus,
        })
    }

    fn open(bind_addr: SocketAddrV4) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        if is_multicast(&bind_addr) {
            let unspecified = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, bind_addr.port());
            socket.bind(&unspecified.into())?;
            socket.join_multicast_v4(bind_addr.ip(), &Ipv4Addr::UNSPECIFIED)?;
        } else {
            socket.bind(&bind_addr.into())?;
        }

        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let _ = socket.set_recv_buffer_size(RECV_BUFFER_SIZE);

        Ok(socket.into())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive one datagram into `buf`. On a read timeout, the timeout
    /// count is tracked and, once it reaches `REOPEN_AFTER_TIMEOUTS`, the
    /// socket is transparently rebound before returning the timeout error
    /// to the caller — the next call will use the fresh socket.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.recv_from(buf) {
            Ok((len, _addr)) => {
                self.consecutive_timeouts = 0;
                Ok(len)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                self.consecutive_timeouts += 1;
                if self.consecutive_timeouts >= REOPEN_AFTER_TIMEOUTS {
                    self.signal_bus.emit(
                        SignalKind::NoInputSignal,
                        format!("no data from {} after {} timeouts, reopening socket", self.bind_addr, self.consecutive_timeouts),
                    );
                    if let Ok(fresh) = Self::open(self.bind_addr) {
                        self.socket = fresh;
                    }
                    self.consecutive_timeouts = 0;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_to_an_ephemeral_unicast_port() {
        let (bus, _rx) = SignalBus::channel();
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        let reader = UdpSourceReader::bind(addr, bus).unwrap();
        let local = reader.local_addr().unwrap();
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn multicast_address_is_detected() {
        let multicast = SocketAddrV4::new(Ipv4Addr::new(239, 1, 1, 1), 5000);
        let unicast = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5000);
        assert!(is_multicast(&multicast));
        assert!(!is_multicast(&unicast));
    }
}
