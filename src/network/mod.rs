pub mod keepalive;
pub mod tcp;

use std::io;

/// Non-blocking byte transport under the PPP session
///
/// This is the interface the mainloop drives: an already-established,
/// record-oriented secure stream (TLS in the real client). Both calls must
/// return immediately.
///
/// # Contract
/// - `Ok(n)` with `n > 0`: that many bytes were transferred.
/// - `Ok(0)`: the transport cannot make progress right now (would block).
///   A blocked `write` must later be retried with the identical buffer;
///   implementations may rely on that to resume a partially flushed frame.
/// - `Err`: the transport failed or was closed. The session reports
///   `Status::Reconnect` and the host owns reconnection policy.
pub trait Transport {
    /// Reads one frame's worth of bytes into `buf`
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `buf`, all or nothing from the caller's point of view
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Whether the transport is known to be down
    ///
    /// Checked at the top of every mainloop pass so a dead connection
    /// turns into a reconnect request before any I/O is attempted.
    fn is_closed(&self) -> bool {
        false
    }
}
