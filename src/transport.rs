//! Frame-delimited TCP carrier. Grounded in `pcie_net_init`/`pcie_net_recv_buf`
//! of the original `pcie_net.c`: bind+listen+accept on the local side,
//! a 2-byte length header read to completion before the payload, and a
//! single serialized sender shared by replies, MSI notifications and
//! deferred-task bulk writes.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::wire::{self, Message, Reply, HEADER_SIZE, MAX_ENVELOPE};

/// Outcome of one [`Transport::receive_message`] call.
pub enum Received {
    Message(Message),
    /// A frame decoded to something other than a `Message` (e.g. the
    /// wire layer's own bookkeeping) — nothing for the caller to do.
    None,
}

/// Cheaply clonable handle used to send on the peer socket. Every
/// sender — reply path, MSI, deferred-task bulk writes, Bridge
/// tx_queue drain — goes through the same mutex, so sends are
/// serialized at message boundaries.
#[derive(Clone)]
pub struct Sender {
    stream: Arc<Mutex<TcpStream>>,
}

impl Sender {
    /// Build a sender directly from an already-connected stream, for
    /// tooling and tests that don't go through [`Transport::open`].
    pub fn from_stream(stream: TcpStream) -> Sender {
        Sender {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn send_message(&self, msg: &Message) -> io::Result<()> {
        self.write_frame(&msg.encode())
    }

    pub fn send_reply(&self, reply: &Reply) -> io::Result<()> {
        self.write_frame(&reply.encode())
    }

    fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap();
        stream.write_all(frame)
    }
}

/// Owns the listening and peer sockets and the read side of the
/// connection. The write side is reachable through [`Transport::sender`]
/// and may be cloned out to other components.
pub struct Transport {
    // Kept alive for the lifetime of the connection even though nothing
    // reads from it again after accept(); dropping it would be harmless
    // but keeping it documents that we own the listening socket.
    _listener: Option<TcpListener>,
    stream: TcpStream,
    sender: Sender,
}

impl Transport {
    /// Bind `local`, listen, and accept a single connection from the
    /// root-complex peer. `remote` is accepted for parity with the
    /// original API surface but is not required to establish a TCP
    /// accept-side connection; it documents the peer the protocol
    /// expects to talk to.
    pub fn open(local: SocketAddr, _remote: SocketAddr) -> Result<Transport> {
        let listener = TcpListener::bind(local)
            .map_err(|e| Error::TransportInit(format!("bind {}: {}", local, e)))?;
        Transport::from_listener(listener)
    }

    /// Accept a single connection on an already-bound listener. Useful
    /// for callers (and tests) that need to learn the bound ephemeral
    /// port before a peer connects, which `open`'s combined bind+accept
    /// doesn't expose.
    pub fn from_listener(listener: TcpListener) -> Result<Transport> {
        let (stream, _peer) = listener
            .accept()
            .map_err(|e| Error::TransportInit(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::TransportInit(e.to_string()))?;

        let sender = Sender {
            stream: Arc::new(Mutex::new(
                stream
                    .try_clone()
                    .map_err(|e| Error::TransportInit(e.to_string()))?,
            )),
        };

        Ok(Transport {
            _listener: Some(listener),
            stream,
            sender,
        })
    }

    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    pub fn send_message(&self, msg: &Message) -> io::Result<()> {
        self.sender.send_message(msg)
    }

    pub fn send_reply(&self, reply: &Reply) -> io::Result<()> {
        self.sender.send_reply(reply)
    }

    /// Read exactly one frame: the 2-byte header followed by
    /// `size - HEADER_SIZE` payload bytes, retrying short reads until
    /// complete. Returns `Ok(Received::None)` only for frames whose
    /// payload doesn't decode as a [`Message`] (the caller should treat
    /// that the same as an unknown op — log and continue, no reply).
    pub fn receive_message(&mut self) -> Result<Received> {
        let mut header = [0u8; HEADER_SIZE];
        read_exact_or_closed(&mut self.stream, &mut header)?;
        let size = u16::from_le_bytes(header) as usize;

        if size < HEADER_SIZE || size > MAX_ENVELOPE {
            return Err(Error::TransportClosed(format!(
                "oversize or malformed frame header: {} bytes",
                size
            )));
        }

        let mut body = vec![0u8; size - HEADER_SIZE];
        read_exact_or_closed(&mut self.stream, &mut body)?;

        Ok(match wire::Message::decode(&body) {
            Some(msg) => Received::Message(msg),
            None => Received::None,
        })
    }
}

/// `read_exact`, but treats EOF mid-frame as `TransportClosed` instead
/// of the generic `UnexpectedEof` io error.
fn read_exact_or_closed(stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
    match stream.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(Error::TransportClosed("peer closed connection".into()))
        }
        Err(e) => Err(Error::TransportClosed(e.to_string())),
    }
}

impl AsRawFd for Transport {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
