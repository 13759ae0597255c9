//! Host-side handles passed into the mainloop
//!
//! The queues and IP parameters belong to the host; the mainloop is the
//! only consumer of `control`/`outgoing` and the only producer of
//! `incoming`. All three are single-producer/single-consumer FIFOs; in a
//! threaded host, producer and mainloop must share one reactor thread.

use crate::network::keepalive::Keepalive;
use crate::packet::Packet;
use crate::session::config::IpInfo;
use std::collections::VecDeque;

/// Everything the mainloop needs from the host besides the transport
pub struct TunnelIo {
    /// Negotiation packets waiting to be sent; always drained before data
    pub control: VecDeque<Packet>,
    /// Outbound IP packets from the tun device
    pub outgoing: VecDeque<Packet>,
    /// Inbound IP packets for the tun device
    pub incoming: VecDeque<Packet>,
    pub ip_info: IpInfo,
    pub keepalive: Keepalive,
    /// When a DTLS side channel carries the data plane, the TLS mainloop
    /// only services the control queue
    pub dtls_connected: bool,
}

impl TunnelIo {
    pub fn new(ip_info: IpInfo, keepalive: Keepalive) -> Self {
        Self {
            control: VecDeque::new(),
            outgoing: VecDeque::new(),
            incoming: VecDeque::new(),
            ip_info,
            keepalive,
            dtls_connected: false,
        }
    }
}
