//! Per-protocol negotiation state
//!
//! Each of LCP, IPCP and IP6CP runs the same request/ack dance; an [`Ncp`]
//! records how far one of them has gotten. The protocol is OPEN once a
//! Configure-Ack has gone out in both directions.

use bitflags::bitflags;
use std::time::{Duration, Instant};

/// How long to wait for an answer before re-sending a Configure-Request
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_secs(3);

bitflags! {
    /// Negotiation progress bits for one NCP
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NcpFlags: u8 {
        const CONF_REQ_RECEIVED = 0x01;
        const CONF_REQ_SENT = 0x02;
        const CONF_ACK_RECEIVED = 0x04;
        const CONF_ACK_SENT = 0x08;
        const TERM_REQ_SENT = 0x10;
        const TERM_REQ_RECEIVED = 0x20;
        const TERM_ACK_SENT = 0x40;
        const TERM_ACK_RECEIVED = 0x80;
    }
}

/// Negotiation record for one control protocol
#[derive(Debug, Default)]
pub struct Ncp {
    pub flags: NcpFlags,
    /// Identifier for the next outgoing Configure-Request
    pub id: u8,
    /// When the last Configure-Request went out, for the retransmit timer
    pub last_req: Option<Instant>,
}

impl Ncp {
    pub fn new() -> Self {
        Self {
            flags: NcpFlags::empty(),
            id: 1,
            last_req: None,
        }
    }

    /// OPEN means acks have been exchanged in both directions
    pub fn is_open(&self) -> bool {
        self.flags
            .contains(NcpFlags::CONF_ACK_SENT | NcpFlags::CONF_ACK_RECEIVED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_requires_acks_both_ways() {
        let mut ncp = Ncp::new();
        assert!(!ncp.is_open());
        ncp.flags |= NcpFlags::CONF_ACK_SENT;
        assert!(!ncp.is_open());
        ncp.flags |= NcpFlags::CONF_ACK_RECEIVED;
        assert!(ncp.is_open());
    }
}
