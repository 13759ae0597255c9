//! Frame parsing and validation errors
//!
//! This module defines error types that can occur while decoding the outer
//! encapsulation, the PPP header, and negotiation payloads. Not every error
//! kills the session: the mainloop drops a frame that is merely malformed at
//! the outer layer, but terminates when the PPP layer is inconsistent with
//! what was negotiated.

use std::fmt;
use std::fmt::Display;

/// Frame decoding and protocol errors
///
/// Variants split into two classes:
/// - Recoverable (the offending frame is logged and discarded):
///   [`FrameError::BadEncapHeader`], [`FrameError::LengthMismatch`].
/// - Fatal (the session terminates with a quit reason): everything else.
#[derive(Debug)]
pub enum FrameError {
    /// Transport returned fewer than 8 bytes for a frame
    ///
    /// The smallest valid frame is an outer header plus a minimal PPP
    /// header; anything shorter means the stream is desynchronized.
    ShortRead(usize),

    /// Outer encapsulation magic was not `0xf500`
    BadEncapHeader(u16),

    /// Outer header length field disagrees with the bytes actually read
    ///
    /// `read` is the transport read length (including the 4 outer bytes),
    /// `claimed` the payload length from the header.
    LengthMismatch { read: usize, claimed: usize },

    /// The `FF 03` address/control pair is missing and the peer never
    /// negotiated address-and-control-field compression
    MissingAddressControl,

    /// Frame ended in the middle of the PPP header
    Truncated,

    /// PPP protocol number this engine does not speak
    UnknownProtocol(u16),

    /// Negotiation packet code outside the range 1..=11
    UnknownCode(u8),

    /// Peer sent a Configure-Nak/Reject or Code/Protocol-Reject
    ///
    /// The engine does not implement the iterative renegotiation loop, so
    /// any rejection is terminal.
    Rejected(&'static str),

    /// A Configure-Request carried an option this engine does not recognize
    ///
    /// The request is not acked. `len` is the option value length (the TLV
    /// length field minus its own 2-byte header).
    UnknownOption { proto: u16, tag: u8, len: u8 },

    /// LCP/IPCP/IP6CP packet whose embedded length disagrees with the frame
    BadControlLength { payload: usize, claimed: usize },

    /// Transport accepted only part of a frame it had already committed to
    ShortWrite { wanted: usize, wrote: usize },
}

impl std::error::Error for FrameError {}

impl Display for FrameError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::ShortRead(n) => write!(fmt, "short packet received ({} bytes)", n),
            FrameError::BadEncapHeader(magic) => {
                write!(fmt, "unexpected pre-PPP packet header 0x{:04x}", magic)
            }
            FrameError::LengthMismatch { read, claimed } => write!(
                fmt,
                "unexpected packet length: read {} bytes but header claims {} payload bytes",
                read, claimed
            ),
            FrameError::MissingAddressControl => "bad incoming PPP packet".fmt(fmt),
            FrameError::Truncated => "truncated PPP header".fmt(fmt),
            FrameError::UnknownProtocol(proto) => {
                write!(fmt, "PPP packet with unknown protocol 0x{:04x}", proto)
            }
            FrameError::UnknownCode(code) => {
                write!(fmt, "PPP config packet with unknown code {}", code)
            }
            FrameError::Rejected(name) => write!(fmt, "peer sent {}", name),
            FrameError::UnknownOption { proto, tag, len } => write!(
                fmt,
                "unknown proto 0x{:04x} TLV (tag {}, len {}+2)",
                proto, tag, len
            ),
            FrameError::BadControlLength { payload, claimed } => write!(
                fmt,
                "config packet length mismatch: payload {} bytes, header says {}",
                payload, claimed
            ),
            FrameError::ShortWrite { wanted, wrote } => write!(
                fmt,
                "transport wrote too few bytes: asked for {}, sent {}",
                wanted, wrote
            ),
        }
    }
}
