//! Frame layout for PPP over a TLS byte stream
//!
//! Each PPP frame travels inside an outer encapsulation. For the F5 carrier
//! that is a fixed 4-byte header; the F5-HDLC carrier instead byte-stuffs
//! the frame and relies on `0x7e` flags for delimiting.
//!
//! # F5 outer header (4 bytes)
//! ```text
//! +--------+--------+--------+--------+
//! |  0xF5  |  0x00  |  Payload Length |
//! +--------+--------+--------+--------+
//! ```
//!
//! # PPP header (1 to 4 bytes)
//! ```text
//! +--------+--------+-----------------+
//! |  0xFF  |  0x03  |    Protocol     |
//! +--------+--------+-----------------+
//! ```
//!
//! The `FF 03` address/control pair is omitted on non-LCP frames when the
//! sender's Configure-Request advertised ACCOMP, and the protocol field
//! shrinks to one byte when it advertised PFCOMP and the number is odd and
//! fits. LCP frames always carry the full, uncompressed header.

use crate::codec::errors::FrameError;
use crate::packet::Packet;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Outer encapsulation magic for the F5 carrier
pub const F5_MAGIC: u16 = 0xf500;

/// Outer encapsulation variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encap {
    /// 4-byte `F5 00 <len>` header per frame
    F5,
    /// No outer header; HDLC flags and byte stuffing
    F5Hdlc,
}

impl Encap {
    /// Outer header byte count
    pub fn header_len(self) -> usize {
        match self {
            Encap::F5 => 4,
            Encap::F5Hdlc => 0,
        }
    }

    /// Whether HDLC byte stuffing applies on this carrier
    pub fn hdlc(self) -> bool {
        matches!(self, Encap::F5Hdlc)
    }
}

impl Display for Encap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encap::F5 => "F5".fmt(f),
            Encap::F5Hdlc => "F5 HDLC".fmt(f),
        }
    }
}

/// PPP protocol numbers this engine speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Link Control Protocol
    Lcp,
    /// IPv4 control protocol
    Ipcp,
    /// IPv6 control protocol
    Ip6cp,
    /// IPv4 data
    Ipv4,
    /// IPv6 data
    Ip6,
}

impl Protocol {
    /// On-the-wire protocol number
    pub fn number(self) -> u16 {
        match self {
            Protocol::Lcp => 0xc021,
            Protocol::Ipcp => 0x8021,
            Protocol::Ip6cp => 0x8057,
            Protocol::Ipv4 => 0x0021,
            Protocol::Ip6 => 0x0057,
        }
    }

    /// True for the three negotiation protocols
    pub fn is_control(self) -> bool {
        matches!(self, Protocol::Lcp | Protocol::Ipcp | Protocol::Ip6cp)
    }
}

impl TryFrom<u16> for Protocol {
    type Error = FrameError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0xc021 => Ok(Protocol::Lcp),
            0x8021 => Ok(Protocol::Ipcp),
            0x8057 => Ok(Protocol::Ip6cp),
            0x0021 => Ok(Protocol::Ipv4),
            0x0057 => Ok(Protocol::Ip6),
            _ => Err(FrameError::UnknownProtocol(v)),
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Lcp => "LCP".fmt(f),
            Protocol::Ipcp => "IPCP".fmt(f),
            Protocol::Ip6cp => "IP6CP".fmt(f),
            Protocol::Ipv4 => "IPv4".fmt(f),
            Protocol::Ip6 => "IPv6".fmt(f),
        }
    }
}

/// Negotiation packet codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    ConfReq = 1,
    ConfAck = 2,
    ConfNak = 3,
    ConfRej = 4,
    TermReq = 5,
    TermAck = 6,
    CodeRej = 7,
    ProtoRej = 8,
    EchoReq = 9,
    EchoRep = 10,
    DiscReq = 11,
}

impl Code {
    /// RFC 1661 name, used in logs and quit reasons
    pub fn name(self) -> &'static str {
        match self {
            Code::ConfReq => "Configure-Request",
            Code::ConfAck => "Configure-Ack",
            Code::ConfNak => "Configure-Nak",
            Code::ConfRej => "Configure-Reject",
            Code::TermReq => "Terminate-Request",
            Code::TermAck => "Terminate-Ack",
            Code::CodeRej => "Code-Reject",
            Code::ProtoRej => "Protocol-Reject",
            Code::EchoReq => "Echo-Request",
            Code::EchoRep => "Echo-Reply",
            Code::DiscReq => "Discard-Request",
        }
    }
}

impl TryFrom<u8> for Code {
    type Error = FrameError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Code::ConfReq),
            2 => Ok(Code::ConfAck),
            3 => Ok(Code::ConfNak),
            4 => Ok(Code::ConfRej),
            5 => Ok(Code::TermReq),
            6 => Ok(Code::TermAck),
            7 => Ok(Code::CodeRej),
            8 => Ok(Code::ProtoRej),
            9 => Ok(Code::EchoReq),
            10 => Ok(Code::EchoRep),
            11 => Ok(Code::DiscReq),
            _ => Err(FrameError::UnknownCode(v)),
        }
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

/// Validates the F5 outer header and returns the payload length
///
/// The read must contain exactly `4 + payload_len` bytes. Both failure
/// modes here are recoverable: the caller logs and discards the frame.
pub fn strip_f5(buf: &[u8]) -> Result<usize, FrameError> {
    if buf.len() < 4 {
        return Err(FrameError::Truncated);
    }
    let magic = u16::from_be_bytes([buf[0], buf[1]]);
    if magic != F5_MAGIC {
        return Err(FrameError::BadEncapHeader(magic));
    }
    let claimed = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if buf.len() != 4 + claimed {
        return Err(FrameError::LengthMismatch {
            read: buf.len(),
            claimed,
        });
    }
    Ok(claimed)
}

/// Parses the PPP header at the start of `buf`
///
/// `accomp` and `pfcomp` are the compressions the peer asked us to accept
/// on inbound frames. LCP frames are recognized by their full uncompressed
/// header before any compression rule applies.
///
/// # Returns
/// The protocol and the number of header bytes consumed.
pub fn parse_ppp_header(
    buf: &[u8],
    accomp: bool,
    pfcomp: bool,
) -> Result<(Protocol, usize), FrameError> {
    if buf.len() >= 4
        && buf[0] == 0xff
        && buf[1] == 0x03
        && u16::from_be_bytes([buf[2], buf[3]]) == Protocol::Lcp.number()
    {
        // No ACCOMP or PFCOMP for LCP frames
        return Ok((Protocol::Lcp, 4));
    }

    if buf.len() < 2 {
        return Err(FrameError::Truncated);
    }
    let mut idx = 0;
    if buf[0] == 0xff && buf[1] == 0x03 {
        // ACCOMP is still optional for the peer
        idx = 2;
    } else if !accomp {
        return Err(FrameError::MissingAddressControl);
    }

    let number = if pfcomp {
        let hi = *buf.get(idx).ok_or(FrameError::Truncated)?;
        idx += 1;
        if hi & 1 == 0 {
            let lo = *buf.get(idx).ok_or(FrameError::Truncated)?;
            idx += 1;
            u16::from_be_bytes([hi, lo])
        } else {
            hi as u16
        }
    } else {
        if buf.len() < idx + 2 {
            return Err(FrameError::Truncated);
        }
        let n = u16::from_be_bytes([buf[idx], buf[idx + 1]]);
        idx += 2;
        n
    };

    Ok((Protocol::try_from(number)?, idx))
}

/// Prepends the PPP header and the outer encapsulation to a packet
///
/// Headers are written backwards into the packet's headroom so the payload
/// never moves. `accomp`/`pfcomp` are the compressions we advertised in
/// our own Configure-Request, governing our outgoing frames; LCP frames
/// ignore both.
pub fn push_headers(pkt: &mut Packet, proto: Protocol, accomp: bool, pfcomp: bool, encap: Encap) {
    let n = proto.number();
    if pfcomp && n <= 0xff && n & 1 == 1 {
        pkt.prepend(&[n as u8]);
    } else {
        pkt.prepend(&n.to_be_bytes());
    }
    if proto == Protocol::Lcp || !accomp {
        pkt.prepend(&[0xff, 0x03]);
    }
    if let Encap::F5 = encap {
        let len = pkt.wire_len() as u16;
        let mut hdr = [0xf5, 0x00, 0, 0];
        hdr[2..4].copy_from_slice(&len.to_be_bytes());
        pkt.prepend(&hdr);
    }
}
