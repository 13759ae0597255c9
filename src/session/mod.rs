//! The PPP session: negotiation state and the mainloop that drives it
//!
//! A [`Session`] owns everything the link-layer state machines need: the
//! overall phase, one [`ncp::Ncp`] record per control protocol, and the
//! option sets negotiated in each direction. It is created by the host once
//! the secure transport is up, mutated only from inside
//! [`Session::mainloop`], and discarded on terminate or reconnect; nothing
//! survives across reconnects.

pub mod config;
pub mod mainloop;
pub mod negotiate;
pub mod ncp;

pub use mainloop::Status;

use crate::codec::frame::Encap;
use crate::packet::Packet;
use crate::session::ncp::Ncp;
use bitflags::bitflags;
use std::fmt::Display;
use std::net::Ipv4Addr;

bitflags! {
    /// LCP option flags, one set per direction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LcpOpts: u8 {
        /// Address-and-Control-Field-Compression
        const ACCOMP = 0x01;
        /// Protocol-Field-Compression
        const PFCOMP = 0x02;
        /// Van Jacobson TCP/IP compression (accepted, never requested)
        const VJCOMP = 0x04;
    }
}

/// Overall PPP phase
///
/// Ordered the way negotiation progresses; the Echo handler relies on the
/// ordering (`>= Opened`). `Authenticate` is reserved: the transport has
/// already authenticated the peer before the session exists, so reaching it
/// is an internal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Dead,
    Establish,
    Opened,
    Authenticate,
    Network,
    Terminate,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Dead => "DEAD".fmt(f),
            SessionState::Establish => "ESTABLISH".fmt(f),
            SessionState::Opened => "OPENED".fmt(f),
            SessionState::Authenticate => "AUTHENTICATE".fmt(f),
            SessionState::Network => "NETWORK".fmt(f),
            SessionState::Terminate => "TERMINATE".fmt(f),
        }
    }
}

/// One PPP session over one tunnel transport
pub struct Session {
    pub(crate) encap: Encap,
    pub(crate) want_ipv4: bool,
    pub(crate) want_ipv6: bool,

    pub(crate) state: SessionState,
    pub(crate) lcp: Ncp,
    pub(crate) ipcp: Ncp,
    pub(crate) ip6cp: Ncp,

    // Outgoing options
    pub(crate) out_asyncmap: u32,
    pub(crate) out_lcp_opts: LcpOpts,
    /// Our magic number, kept in wire order
    pub(crate) out_lcp_magic: [u8; 4],
    pub(crate) out_peer_addr: Ipv4Addr,
    pub(crate) out_ipv6_int_ident: [u8; 8],
    /// Rolling identifier for Echo/Discard probes
    pub(crate) util_id: u8,

    // Incoming options
    /// Guessed PPP header size of the next data frame, a hint only
    pub(crate) exp_ppp_hdr_size: usize,
    pub(crate) in_asyncmap: u32,
    pub(crate) in_lcp_opts: LcpOpts,
    pub(crate) in_lcp_magic: [u8; 4],
    pub(crate) in_peer_addr: Ipv4Addr,
    pub(crate) in_ipv6_int_ident: [u8; 8],

    pub(crate) quit_reason: Option<String>,

    /// Receive buffer kept across would-block so it is allocated once
    pub(crate) rx_pkt: Option<Packet>,
    /// Packet whose write blocked; retried with identical bytes
    pub(crate) current_pkt: Option<Packet>,
}

impl Session {
    /// Creates a session over an established, authenticated transport
    pub fn new(encap: Encap, want_ipv4: bool, want_ipv6: bool) -> Self {
        Self {
            encap,
            want_ipv4,
            want_ipv6,
            state: SessionState::Dead,
            lcp: Ncp::new(),
            ipcp: Ncp::new(),
            ip6cp: Ncp::new(),
            out_asyncmap: 0,
            out_lcp_opts: LcpOpts::empty(),
            out_lcp_magic: [0; 4],
            out_peer_addr: Ipv4Addr::UNSPECIFIED,
            out_ipv6_int_ident: [0; 8],
            util_id: 0,
            // Address(1) + Control(1) + Proto(2)
            exp_ppp_hdr_size: 4,
            in_asyncmap: 0,
            in_lcp_opts: LcpOpts::empty(),
            in_lcp_magic: [0; 4],
            in_peer_addr: Ipv4Addr::UNSPECIFIED,
            in_ipv6_int_ident: [0; 8],
            quit_reason: None,
            rx_pkt: None,
            current_pkt: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Why the session ended, when the peer or a fatal error said so
    pub fn quit_reason(&self) -> Option<&str> {
        self.quit_reason.as_deref()
    }

    /// Peer IPv4 address learned from IPCP
    pub fn peer_addr(&self) -> Ipv4Addr {
        self.in_peer_addr
    }

    /// Peer IPv6 interface identifier learned from IP6CP
    pub fn peer_ipv6_int_ident(&self) -> [u8; 8] {
        self.in_ipv6_int_ident
    }

    pub(crate) fn ncp_mut(&mut self, proto: crate::codec::frame::Protocol) -> &mut Ncp {
        use crate::codec::frame::Protocol;
        match proto {
            Protocol::Lcp => &mut self.lcp,
            Protocol::Ipcp => &mut self.ipcp,
            Protocol::Ip6cp => &mut self.ip6cp,
            Protocol::Ipv4 | Protocol::Ip6 => unreachable!("data protocols carry no NCP"),
        }
    }

    pub(crate) fn next_util_id(&mut self) -> u8 {
        let id = self.util_id;
        self.util_id = self.util_id.wrapping_add(1);
        id
    }

    pub(crate) fn log_state(&self) {
        tracing::trace!("current PPP state: {} (encap {})", self.state, self.encap);
        tracing::trace!(
            "    in: asyncmap=0x{:08x}, lcp_opts={:?}, lcp_magic=0x{:08x}, peer={}",
            self.in_asyncmap,
            self.in_lcp_opts,
            u32::from_be_bytes(self.in_lcp_magic),
            self.in_peer_addr
        );
        tracing::trace!(
            "   out: asyncmap=0x{:08x}, lcp_opts={:?}, lcp_magic=0x{:08x}, peer={}",
            self.out_asyncmap,
            self.out_lcp_opts,
            u32::from_be_bytes(self.out_lcp_magic),
            self.out_peer_addr
        );
    }
}
