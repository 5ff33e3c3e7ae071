use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Mutex;

use crate::error::Result;
use crate::net::message::Message;
use crate::net::socket::UnixSocket;

/// A full-duplex session over one stream endpoint. Send and receive hold
/// independent locks, so one thread may transmit while another receives.
#[derive(Debug)]
pub struct Connection {
    socket: UnixSocket,
    transmit: Mutex<()>,
    receive: Mutex<()>,
}

impl Connection {
    /// Wraps an already connected endpoint, typically fresh out of accept.
    #[inline]
    pub fn new(socket: UnixSocket) -> Connection {
        Connection {
            socket,
            transmit: Mutex::new(()),
            receive: Mutex::new(()),
        }
    }

    /// Connects to the listener at `path`.
    #[inline]
    pub fn connect(path: &str) -> Result<Connection> {
        Ok(Connection::new(UnixSocket::connect(path)?))
    }

    pub fn send(&self, message: &mut Message) -> Result<()> {
        let _guard = self.transmit.lock().unwrap();
        message.encode(&self.socket)
    }

    pub fn recv(&self) -> Result<Message> {
        let _guard = self.receive.lock().unwrap();
        Message::decode(&self.socket)
    }

    /// One round-trip: send, then receive the reply. The two locks are never
    /// held at the same time; callers interleaving distinct requests on one
    /// connection must serialize the whole round-trip themselves.
    pub fn request(&self, message: &mut Message) -> Result<Message> {
        self.send(message)?;
        self.recv()
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.socket.fd()
    }
}

impl AsRawFd for Connection {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.socket.fd()
    }
}
