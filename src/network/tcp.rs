//! Non-blocking TCP adapter for the session transport
//!
//! Wraps a tokio [`TcpStream`] behind the synchronous [`Transport`]
//! contract using `try_read`/`try_write`. The host reactor awaits
//! [`TcpTransport::ready`] and then drives the mainloop with the readiness
//! it observed.

use crate::network::Transport;
use std::io;
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;

/// TCP-backed transport with an identical-retry resume offset
///
/// A stream socket may accept only part of a frame. The adapter remembers
/// how much of the current buffer already went out and reports would-block
/// until the rest follows, so the caller's identical-retry contract maps
/// cleanly onto TCP.
pub struct TcpTransport {
    socket: TcpStream,
    resume: usize,
    closed: bool,
}

impl TcpTransport {
    pub fn new(socket: TcpStream) -> Self {
        Self {
            socket,
            resume: 0,
            closed: false,
        }
    }

    /// Waits until the socket is readable or writable
    pub async fn ready(&self) -> io::Result<Ready> {
        self.socket
            .ready(Interest::READABLE | Interest::WRITABLE)
            .await
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.try_read(buf) {
            Ok(0) => {
                self.closed = true;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ))
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    /// Writes `buf`, resuming a previously blocked attempt
    ///
    /// The caller must retry with the identical buffer after an `Ok(0)`;
    /// `resume` tracks how much of it the socket already took.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        while self.resume < buf.len() {
            match self.socket.try_write(&buf[self.resume..]) {
                Ok(0) => {
                    self.closed = true;
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed by peer",
                    ));
                }
                Ok(n) => self.resume += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => {
                    self.closed = true;
                    return Err(e);
                }
            }
        }
        Ok(std::mem::take(&mut self.resume))
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
