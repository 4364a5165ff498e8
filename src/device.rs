//! The byte-transport contract and the two devices shipped with the crate.
//!
//! A `Device` delivers exactly one message per read and sends one message
//! per write. Datagram transports have this shape natively; stream
//! transports need a framer upstream that reproduces it.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Blocking, message-oriented byte transport.
///
/// `read` blocks and returns the bytes of exactly one message; a return of
/// 0 signals a transient failure (the caller backs off and retries).
/// `write` sends one message atomically; a partial write is a device error.
pub trait Device: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// In-process datagram loopback, one direction per channel.
///
/// `pair()` returns two cross-connected endpoints. Dropping either end
/// aborts the peer's blocked read, which is how test servers and clients
/// shut down.
pub struct MemDevice {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl MemDevice {
    pub fn pair() -> (MemDevice, MemDevice) {
        let (atx, arx) = unbounded();
        let (btx, brx) = unbounded();
        (MemDevice { tx: atx, rx: brx }, MemDevice { tx: btx, rx: arx })
    }
}

impl Device for MemDevice {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let msg = self
            .rx
            .recv()
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionAborted))?;
        if msg.len() > buf.len() {
            return Err(io::Error::from(io::ErrorKind::InvalidData));
        }
        buf[..msg.len()].copy_from_slice(&msg);
        Ok(msg.len())
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }
}

/// UDP datagram device.
///
/// A listening endpoint learns its peer from the most recent receive; a
/// connecting endpoint is fixed to the server address.
pub struct UdpDevice {
    sock: UdpSocket,
    peer: Mutex<Option<SocketAddr>>,
    connected: bool,
}

impl UdpDevice {
    /// Server side: bind and answer whoever talked last.
    pub fn listen<A: ToSocketAddrs>(addr: A) -> io::Result<UdpDevice> {
        let sock = UdpSocket::bind(addr)?;
        Ok(UdpDevice {
            sock,
            peer: Mutex::new(None),
            connected: false,
        })
    }

    /// Client side: fixed server address.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<UdpDevice> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.connect(addr)?;
        Ok(UdpDevice {
            sock,
            peer: Mutex::new(None),
            connected: true,
        })
    }
}

impl Device for UdpDevice {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.connected {
            self.sock.recv(buf)
        } else {
            let (n, from) = self.sock.recv_from(buf)?;
            *self.peer.lock().unwrap() = Some(from);
            Ok(n)
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.connected {
            self.sock.send(buf)
        } else {
            let peer = *self.peer.lock().unwrap();
            let peer = peer.ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "no peer has sent yet")
            })?;
            self.sock.send_to(buf, peer)
        }
    }
}
