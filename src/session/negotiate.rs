//! Configure-Request construction and control packet dispatch
//!
//! Outgoing requests advertise a pragmatic option set: MTU, a zero
//! asyncmap, our magic number and both header compressions on LCP; the
//! desired addresses on IPCP/IP6CP. Incoming requests are either acked
//! wholesale or refused; this engine does not haggle, so a Configure-Nak
//! or any reject code ends the session.

use crate::codec::errors::FrameError;
use crate::codec::frame::{Code, Protocol};
use crate::codec::hdlc;
use crate::codec::tlv::{self, Opt};
use crate::packet::Packet;
use crate::session::ncp::NcpFlags;
use crate::session::{LcpOpts, Session, SessionState};
use crate::tunnel::TunnelIo;
use bytes::BytesMut;

/// Wraps a negotiation payload in the `code, id, length` header and queues
/// it on the control queue, protocol annotated out-of-band
pub(crate) fn queue_config_packet(
    io: &mut TunnelIo,
    proto: Protocol,
    code: Code,
    id: u8,
    payload: &[u8],
) {
    io.control
        .push_back(Packet::control(proto, code as u8, id, payload));
}

impl Session {
    /// Picks our magic number
    ///
    /// Once the peer's magic is known ours is its bitwise complement, which
    /// is guaranteed to differ. If we transmit first, any nonzero value
    /// does; it is replaced by the complement on the next request after the
    /// peer's magic arrives.
    fn choose_magic(&mut self) {
        if self.in_lcp_magic != [0; 4] {
            self.out_lcp_magic = self.in_lcp_magic.map(|b| !b);
        } else if self.out_lcp_magic == [0; 4] {
            let magic: u32 = rand::random();
            self.out_lcp_magic = magic.max(1).to_be_bytes();
        }
    }

    /// Builds and queues a Configure-Request for one control protocol
    ///
    /// The option payload is byte-stuffed iff the carrier is HDLC, under
    /// the all-ones pre-negotiation asyncmap for LCP and the negotiated
    /// outgoing map for the others.
    pub(crate) fn queue_config_request(&mut self, io: &mut TunnelIo, proto: Protocol) {
        let hdlc = self.encap.hdlc();
        let mut buf = BytesMut::with_capacity(64);

        match proto {
            Protocol::Lcp => {
                self.out_asyncmap = 0;
                self.out_lcp_opts = LcpOpts::ACCOMP | LcpOpts::PFCOMP;
                self.choose_magic();
                if io.ip_info.mtu == 0 {
                    io.ip_info.mtu = 1300;
                }

                tlv::put_tlv_be16(&mut buf, 1, io.ip_info.mtu, hdlc, hdlc::ASYNCMAP_LCP);
                tlv::put_tlv_be32(&mut buf, 2, self.out_asyncmap, hdlc, hdlc::ASYNCMAP_LCP);
                tlv::put_tlv(&mut buf, 5, &self.out_lcp_magic, hdlc, hdlc::ASYNCMAP_LCP);
                if self.out_lcp_opts.contains(LcpOpts::PFCOMP) {
                    tlv::put_tlv(&mut buf, 7, &[], hdlc, hdlc::ASYNCMAP_LCP);
                }
                if self.out_lcp_opts.contains(LcpOpts::ACCOMP) {
                    tlv::put_tlv(&mut buf, 8, &[], hdlc, hdlc::ASYNCMAP_LCP);
                }
            }

            Protocol::Ipcp => {
                if let Some(addr) = io.ip_info.addr {
                    self.out_peer_addr = addr;
                }
                tlv::put_tlv(
                    &mut buf,
                    3,
                    &self.out_peer_addr.octets(),
                    hdlc,
                    self.out_asyncmap,
                );
            }

            Protocol::Ip6cp => {
                if let Some(addr6) = io.ip_info.addr6 {
                    // Interface identifier is the low 64 bits of the address.
                    self.out_ipv6_int_ident
                        .copy_from_slice(&addr6.octets()[8..16]);
                }
                tlv::put_tlv(&mut buf, 1, &self.out_ipv6_int_ident, hdlc, self.out_asyncmap);
            }

            Protocol::Ipv4 | Protocol::Ip6 => {
                debug_assert!(false, "data protocols are not negotiated");
                return;
            }
        }

        let ncp = self.ncp_mut(proto);
        let id = ncp.id;
        ncp.flags |= NcpFlags::CONF_REQ_SENT;
        tracing::debug!("sending our {} id {} config request to server", proto, id);
        queue_config_packet(io, proto, Code::ConfReq, id, &buf);
    }

    /// Applies one recognized option from a peer Configure-Request
    fn apply_option(&mut self, io: &mut TunnelIo, opt: Opt) {
        match opt {
            Opt::Mtu(mtu) => {
                io.ip_info.mtu = mtu;
                tracing::debug!("received MTU {} from server", mtu);
            }
            Opt::Asyncmap(map) => {
                self.in_asyncmap = map;
                tracing::debug!("received asyncmap of 0x{:08x} from server", map);
            }
            Opt::Magic(magic) => {
                self.in_lcp_magic = magic;
                tracing::debug!(
                    "received magic number of 0x{:08x} from server",
                    u32::from_be_bytes(magic)
                );
            }
            Opt::Pfcomp => {
                self.in_lcp_opts |= LcpOpts::PFCOMP;
                tracing::debug!("received protocol field compression from server");
            }
            Opt::Accomp => {
                self.in_lcp_opts |= LcpOpts::ACCOMP;
                tracing::debug!("received address and control field compression from server");
            }
            Opt::VjComp => {
                self.in_lcp_opts |= LcpOpts::VJCOMP;
                tracing::debug!("received Van Jacobson TCP/IP compression from server");
            }
            Opt::PeerAddr(addr) => {
                self.in_peer_addr = addr;
                tracing::debug!("received peer IPv4 address {} from server", addr);
            }
            Opt::IfaceId(id) => {
                self.in_ipv6_int_ident = id;
                tracing::debug!(
                    "received peer IPv6 interface identifier {:02x?} from server",
                    id
                );
            }
        }
    }

    /// Handles a peer Configure-Request: parse, apply, ack
    ///
    /// Any option we do not recognize poisons the whole request: no ack
    /// goes out and the error bubbles to the mainloop.
    fn handle_config_request(
        &mut self,
        io: &mut TunnelIo,
        proto: Protocol,
        id: u8,
        payload: &[u8],
    ) -> crate::Result<()> {
        let (opts, trailing) = tlv::parse(proto, payload).map_err(|e| {
            tracing::debug!("{}: {:02x?}", e, payload);
            e
        })?;
        for opt in opts {
            self.apply_option(io, opt);
        }
        self.ncp_mut(proto).flags |= NcpFlags::CONF_REQ_RECEIVED;

        if trailing > 0 {
            tracing::debug!(
                "received {} extra bytes at end of config request: {:02x?}",
                trailing,
                &payload[payload.len() - trailing..]
            );
        }

        tracing::debug!("ack {} id {} config from server", proto, id);
        queue_config_packet(io, proto, Code::ConfAck, id, payload);
        self.ncp_mut(proto).flags |= NcpFlags::CONF_ACK_SENT;
        Ok(())
    }

    fn record_quit_reason(&mut self, trailer: &[u8]) {
        if self.quit_reason.is_none() && !trailer.is_empty() {
            self.quit_reason = Some(String::from_utf8_lossy(trailer).into_owned());
        }
    }

    /// Dispatches one received LCP/IPCP/IP6CP packet by code
    ///
    /// `payload` starts at the `code` byte and its length has already been
    /// validated against the embedded length field.
    pub(crate) fn handle_config_packet(
        &mut self,
        io: &mut TunnelIo,
        proto: Protocol,
        payload: &[u8],
    ) -> crate::Result<()> {
        let id = payload[1];
        let code = Code::try_from(payload[0])?;
        tracing::trace!("received {} id {} {} from server", proto, id, code);

        let mut add_flags = NcpFlags::empty();
        match code {
            Code::ConfReq => self.handle_config_request(io, proto, id, &payload[4..])?,

            // Contents deliberately not compared against our request.
            Code::ConfAck => add_flags |= NcpFlags::CONF_ACK_RECEIVED,

            Code::EchoReq => {
                if self.state >= SessionState::Opened {
                    queue_config_packet(io, proto, Code::EchoRep, id, &self.out_lcp_magic);
                }
            }

            Code::TermReq => {
                add_flags |= NcpFlags::TERM_REQ_RECEIVED;
                queue_config_packet(io, proto, Code::TermAck, id, &[]);
                add_flags |= NcpFlags::TERM_ACK_SENT;
                self.record_quit_reason(&payload[4..]);
                self.state = SessionState::Terminate;
            }

            Code::TermAck => {
                add_flags |= NcpFlags::TERM_ACK_RECEIVED;
                self.record_quit_reason(&payload[4..]);
                self.state = SessionState::Terminate;
            }

            Code::EchoRep | Code::DiscReq => {}

            // No renegotiation loop: any refusal is terminal.
            Code::ConfNak | Code::ConfRej | Code::CodeRej | Code::ProtoRej => {
                return Err(FrameError::Rejected(code.name()).into());
            }
        }

        self.ncp_mut(proto).flags |= add_flags;
        Ok(())
    }
}
