//! Option TLVs inside LCP/IPCP/IP6CP payloads
//!
//! Options are encoded as `tag:u8, length:u8, value[length-2]` where the
//! length field includes the 2-byte header. The parser is deliberately
//! strict: a Configure-Request carrying any option this engine does not
//! recognize is an error and is never acked. Renegotiation via
//! Configure-Nak/Reject is not implemented.

use crate::codec::errors::FrameError;
use crate::codec::frame::Protocol;
use crate::codec::hdlc;
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

/// Recognized configuration options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opt {
    /// LCP 1: Maximum-Receive-Unit
    Mtu(u16),
    /// LCP 2: Async-Control-Character-Map
    Asyncmap(u32),
    /// LCP 5: Magic-Number, kept in wire order
    Magic([u8; 4]),
    /// LCP 7: Protocol-Field-Compression
    Pfcomp,
    /// LCP 8: Address-and-Control-Field-Compression
    Accomp,
    /// IPCP 2 with value 0x002d: Van Jacobson TCP/IP compression
    VjComp,
    /// IPCP 3: peer IPv4 address
    PeerAddr(Ipv4Addr),
    /// IP6CP 1: peer interface identifier
    IfaceId([u8; 8]),
}

fn append_ppp(buf: &mut BytesMut, hdlc: bool, bytes: &[u8], asyncmap: u32) {
    if hdlc {
        hdlc::escape_into(buf, bytes, asyncmap);
    } else {
        buf.put_slice(bytes);
    }
}

/// Appends one TLV, byte-stuffing it iff `hdlc`
pub fn put_tlv(buf: &mut BytesMut, tag: u8, value: &[u8], hdlc: bool, asyncmap: u32) {
    let hdr = [tag, (value.len() + 2) as u8];
    append_ppp(buf, hdlc, &hdr, asyncmap);
    if !value.is_empty() {
        append_ppp(buf, hdlc, value, asyncmap);
    }
}

pub fn put_tlv_be16(buf: &mut BytesMut, tag: u8, value: u16, hdlc: bool, asyncmap: u32) {
    put_tlv(buf, tag, &value.to_be_bytes(), hdlc, asyncmap);
}

pub fn put_tlv_be32(buf: &mut BytesMut, tag: u8, value: u32, hdlc: bool, asyncmap: u32) {
    put_tlv(buf, tag, &value.to_be_bytes(), hdlc, asyncmap);
}

/// Parses the option list of a Configure-Request payload
///
/// Iterates while a full TLV fits in the remaining bytes. Leftover bytes at
/// the end are not a protocol error; their count is returned so the caller
/// can log them as trailing garbage.
///
/// # Returns
/// The recognized options in order, and the number of trailing bytes the
/// iteration could not consume.
pub fn parse(proto: Protocol, payload: &[u8]) -> Result<(Vec<Opt>, usize), FrameError> {
    let mut opts = Vec::new();
    let mut cur = 0;

    while cur + 1 < payload.len() && cur + payload[cur + 1] as usize <= payload.len() {
        let tag = payload[cur];
        let tlen = payload[cur + 1] as usize;
        if tlen < 2 {
            // A zero/one length can never advance the cursor; treat the
            // rest as trailing garbage.
            break;
        }
        let val = &payload[cur + 2..cur + tlen];

        let opt = match (proto, tag, val.len()) {
            (Protocol::Lcp, 1, 2) => Opt::Mtu(u16::from_be_bytes([val[0], val[1]])),
            (Protocol::Lcp, 2, 4) => {
                Opt::Asyncmap(u32::from_be_bytes([val[0], val[1], val[2], val[3]]))
            }
            (Protocol::Lcp, 5, 4) => Opt::Magic([val[0], val[1], val[2], val[3]]),
            (Protocol::Lcp, 7, 0) => Opt::Pfcomp,
            (Protocol::Lcp, 8, 0) => Opt::Accomp,
            (Protocol::Ipcp, 2, 2) if u16::from_be_bytes([val[0], val[1]]) == 0x002d => {
                Opt::VjComp
            }
            (Protocol::Ipcp, 3, 4) => {
                Opt::PeerAddr(Ipv4Addr::new(val[0], val[1], val[2], val[3]))
            }
            (Protocol::Ip6cp, 1, 8) => {
                let mut id = [0u8; 8];
                id.copy_from_slice(val);
                Opt::IfaceId(id)
            }
            _ => {
                return Err(FrameError::UnknownOption {
                    proto: proto.number(),
                    tag,
                    len: val.len() as u8,
                });
            }
        };
        opts.push(opt);
        cur += tlen;
    }

    Ok((opts, payload.len() - cur))
}
