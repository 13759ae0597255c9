//! The session mainloop
//!
//! Single entry point, driven by the host whenever the transport is ready
//! or the requested timeout elapses. One pass advances the state machine,
//! drains inbound frames, retries a blocked write, consults the keepalive
//! scheduler and pushes out the next queued packet. All session state is
//! mutated here and nowhere else.

use crate::codec::errors::FrameError;
use crate::codec::frame::{self, Code, Encap, Protocol};
use crate::codec::hdlc;
use crate::network::Transport;
use crate::network::keepalive::{KaAction, Keepalive};
use crate::packet::Packet;
use crate::session::ncp::{Ncp, NcpFlags, RETRANSMIT_INTERVAL};
use crate::session::negotiate::queue_config_packet;
use crate::session::{LcpOpts, Session, SessionState};
use crate::tunnel::TunnelIo;
use std::time::{Duration, Instant};

/// Outcome of one mainloop pass
///
/// Fatal protocol violations come back as `Err` instead, with
/// [`Session::quit_reason`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Nothing to do until the next readiness event or timeout
    Idle,
    /// Progress was made; call again soon
    Work,
    /// The session terminated (peer request or unexpected state)
    Done,
    /// The transport is unusable or the peer is dead; the host owns
    /// reconnection policy and must build a fresh session afterwards
    Reconnect,
}

enum WriteOutcome {
    Written,
    Blocked,
    Reconnect,
}

fn retransmit_due(ncp: &Ncp, now: Instant, timeout: &mut Duration) -> bool {
    match ncp.last_req {
        None => true,
        Some(at) => Keepalive::check_deadline(timeout, now, at + RETRANSMIT_INTERVAL),
    }
}

impl Session {
    /// Runs one pass of the session engine
    ///
    /// # Arguments
    /// - `transport` - the established secure stream, non-blocking
    /// - `io` - host queues, IP parameters and the keepalive tracker
    /// - `timeout` - in/out: lowered to the next deadline the engine needs
    /// - `readable` - whether the host observed read readiness
    /// - `now` - monotonic timestamp for this pass
    pub fn mainloop(
        &mut self,
        transport: &mut dyn Transport,
        io: &mut TunnelIo,
        timeout: &mut Duration,
        readable: bool,
        now: Instant,
    ) -> crate::Result<Status> {
        let mut work_done = false;

        if transport.is_closed() {
            return Ok(Status::Reconnect);
        }

        if let Some(status) = self.step_state(io, now, timeout) {
            return Ok(status);
        }

        if readable {
            if let Some(status) = self.drain_readable(transport, io, now, &mut work_done)? {
                return Ok(status);
            }
        }

        // A blocked write must be retried before anything else; the
        // transport only accepts the identical buffer again.
        if let Some(pkt) = self.current_pkt.take() {
            match self.write_pkt(transport, io, pkt, now, timeout)? {
                WriteOutcome::Written => work_done = true,
                WriteOutcome::Blocked => {
                    return Ok(if work_done { Status::Work } else { Status::Idle });
                }
                WriteOutcome::Reconnect => return Ok(Status::Reconnect),
            }
        }

        match io.keepalive.action(now, timeout) {
            KaAction::DpdDead => {
                tracing::error!("detected dead peer");
                return Ok(Status::Reconnect);
            }
            KaAction::Rekey => return Ok(Status::Reconnect),
            KaAction::Keepalive => {
                // Real traffic about to go out makes the probe redundant.
                let data_pending = !io.dtls_connected
                    && self.state == SessionState::Network
                    && !io.outgoing.is_empty();
                if io.control.is_empty() && !data_pending {
                    tracing::debug!("send PPP discard request as keepalive");
                    let id = self.next_util_id();
                    queue_config_packet(io, Protocol::Lcp, Code::DiscReq, id, &[]);
                }
            }
            KaAction::Dpd => {
                tracing::debug!("send PPP echo request as DPD");
                let id = self.next_util_id();
                let magic = self.out_lcp_magic;
                queue_config_packet(io, Protocol::Lcp, Code::EchoReq, id, &magic);
            }
            KaAction::None => {}
        }

        // Service the control queue; the IP data queue only carries here
        // when no DTLS side channel does and the network is up.
        let mut pkt = if let Some(pkt) = io.control.pop_front() {
            pkt
        } else if !io.dtls_connected && self.state == SessionState::Network {
            match io.outgoing.pop_front() {
                Some(pkt) => pkt,
                None => return Ok(if work_done { Status::Work } else { Status::Idle }),
            }
        } else {
            return Ok(if work_done { Status::Work } else { Status::Idle });
        };

        let proto = pkt
            .proto()
            .unwrap_or_else(|| if pkt.is_ipv6() { Protocol::Ip6 } else { Protocol::Ipv4 });
        frame::push_headers(
            &mut pkt,
            proto,
            self.out_lcp_opts.contains(LcpOpts::ACCOMP),
            self.out_lcp_opts.contains(LcpOpts::PFCOMP),
            self.encap,
        );
        // TODO: byte-stuff the header and IP data path for the HDLC
        // carrier; today only negotiation payloads are escaped.
        tracing::trace!("sending {} packet ({} bytes total)", proto, pkt.wire_len());

        match self.write_pkt(transport, io, pkt, now, timeout)? {
            WriteOutcome::Written => work_done = true,
            WriteOutcome::Blocked => {}
            WriteOutcome::Reconnect => return Ok(Status::Reconnect),
        }

        Ok(if work_done { Status::Work } else { Status::Idle })
    }

    /// Advances the phase machine, re-sending Configure-Requests as their
    /// retransmit windows expire
    ///
    /// Deliberately falls through: a single pass may go all the way from
    /// DEAD to NETWORK when every condition already holds.
    fn step_state(
        &mut self,
        io: &mut TunnelIo,
        now: Instant,
        timeout: &mut Duration,
    ) -> Option<Status> {
        let last_state = self.state;

        loop {
            match self.state {
                SessionState::Dead => self.state = SessionState::Establish,

                SessionState::Establish => {
                    if self.lcp.is_open() {
                        self.state = SessionState::Opened;
                    } else {
                        if retransmit_due(&self.lcp, now, timeout) {
                            self.lcp.last_req = Some(now);
                            self.queue_config_request(io, Protocol::Lcp);
                        }
                        break;
                    }
                }

                SessionState::Opened => {
                    if self.want_ipv4
                        && !self.ipcp.flags.contains(NcpFlags::CONF_ACK_RECEIVED)
                        && retransmit_due(&self.ipcp, now, timeout)
                    {
                        self.ipcp.last_req = Some(now);
                        self.queue_config_request(io, Protocol::Ipcp);
                    }
                    if self.want_ipv6
                        && !self.ip6cp.flags.contains(NcpFlags::CONF_ACK_RECEIVED)
                        && retransmit_due(&self.ip6cp, now, timeout)
                    {
                        self.ip6cp.last_req = Some(now);
                        self.queue_config_request(io, Protocol::Ip6cp);
                    }

                    // Have we configured all the protocols we want?
                    if (!self.want_ipv4 || self.ipcp.is_open())
                        && (!self.want_ipv6 || self.ip6cp.is_open())
                    {
                        self.state = SessionState::Network;
                    } else {
                        break;
                    }
                }

                SessionState::Network => break,

                SessionState::Terminate => return Some(Status::Done),

                SessionState::Authenticate => {
                    self.quit_reason = Some("Unexpected state".to_string());
                    return Some(Status::Done);
                }
            }
        }

        if last_state != self.state {
            tracing::debug!("PPP state transition from {} to {}", last_state, self.state);
            self.log_state();
        }
        None
    }

    /// Reads and dispatches frames until the transport would block
    fn drain_readable(
        &mut self,
        transport: &mut dyn Transport,
        io: &mut TunnelIo,
        now: Instant,
        work_done: &mut bool,
    ) -> crate::Result<Option<Status>> {
        loop {
            // Some gateways send frames larger than the negotiated MTU;
            // reserve generous extra space, plus headroom sized so the
            // payload usually lands at a stable offset.
            let receive_mtu = usize::max(16384, io.ip_info.mtu as usize);
            let rsv_hdr = self.encap.header_len() + self.exp_ppp_hdr_size;

            let mut pkt = match self.rx_pkt.take() {
                Some(pkt) => pkt,
                None => match Packet::rx(receive_mtu + rsv_hdr) {
                    Ok(pkt) => pkt,
                    Err(e) => {
                        tracing::error!("allocation failed: {}", e);
                        break;
                    }
                },
            };

            let n = match transport.read(pkt.buf_mut()) {
                Ok(0) => {
                    self.rx_pkt = Some(pkt);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("transport read failed: {}", e);
                    return Ok(Some(Status::Reconnect));
                }
            };
            if n < 8 {
                return Err(self.fatal(FrameError::ShortRead(n)));
            }

            let (pay_off, payload_len) = match self.encap {
                Encap::F5 => match frame::strip_f5(&pkt.buf()[..n]) {
                    Ok(len) => (4, len),
                    Err(e) => {
                        // Malformed at the outer layer only: drop the frame
                        // and keep the session.
                        tracing::error!("{}: {:02x?}", e, &pkt.buf()[..n]);
                        self.rx_pkt = Some(pkt);
                        continue;
                    }
                },
                Encap::F5Hdlc => {
                    let cooked = hdlc::unescape(&pkt.buf()[..n]);
                    let len = cooked.len();
                    pkt.buf_mut()[..len].copy_from_slice(&cooked);
                    (0, len)
                }
            };

            let accomp = self.in_lcp_opts.contains(LcpOpts::ACCOMP);
            let pfcomp = self.in_lcp_opts.contains(LcpOpts::PFCOMP);
            let ppp = &pkt.buf()[pay_off..pay_off + payload_len];
            let (proto, consumed) = match frame::parse_ppp_header(ppp, accomp, pfcomp) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::error!("bad incoming PPP packet: {:02x?}", &pkt.buf()[..n]);
                    return Err(self.fatal(e));
                }
            };
            let payload_len = payload_len - consumed;

            io.keepalive.last_rx = now;

            match proto {
                Protocol::Lcp | Protocol::Ipcp | Protocol::Ip6cp => {
                    let body_off = pay_off + consumed;
                    let body = &pkt.buf()[body_off..body_off + payload_len];
                    let claimed = if payload_len < 4 {
                        0
                    } else {
                        u16::from_be_bytes([body[2], body[3]]) as usize
                    };
                    if payload_len < 4 || claimed != payload_len {
                        tracing::error!("bad incoming PPP packet: {:02x?}", &pkt.buf()[..n]);
                        return Err(self.fatal(FrameError::BadControlLength {
                            payload: payload_len,
                            claimed,
                        }));
                    }
                    if let Err(e) = self.handle_config_packet(io, proto, body) {
                        if self.quit_reason.is_none() {
                            self.quit_reason = Some(e.to_string());
                        }
                        return Err(e);
                    }
                    *work_done = true;
                    self.rx_pkt = Some(pkt);
                }

                Protocol::Ipv4 | Protocol::Ip6 => {
                    if self.state != SessionState::Network {
                        tracing::error!(
                            "unexpected {} packet in PPP state {}",
                            proto,
                            self.state
                        );
                        self.rx_pkt = Some(pkt);
                    } else {
                        tracing::trace!("received {} data packet of {} bytes", proto, payload_len);
                        let hdr = pay_off + consumed;
                        if hdr != rsv_hdr {
                            tracing::trace!(
                                "expected {} PPP header bytes but got {}",
                                self.exp_ppp_hdr_size,
                                consumed
                            );
                            // Remember for the next read; a stale guess
                            // only costs a misaligned payload, never bytes.
                            self.exp_ppp_hdr_size = consumed;
                        }
                        pkt.set_window(hdr, payload_len);
                        io.incoming.push_back(pkt);
                        *work_done = true;
                    }
                }
            }
        }
        Ok(None)
    }

    /// Attempts to put one packet on the wire
    ///
    /// `Ok(0)` from the transport retains the packet for an identical
    /// retry; a short write is an internal error because the transport
    /// committed to the frame.
    fn write_pkt(
        &mut self,
        transport: &mut dyn Transport,
        io: &mut TunnelIo,
        pkt: Packet,
        now: Instant,
        timeout: &mut Duration,
    ) -> crate::Result<WriteOutcome> {
        io.keepalive.last_tx = now;
        let wanted = pkt.wire_len();

        match transport.write(pkt.wire()) {
            Ok(0) => match io.keepalive.stalled_action(now, timeout) {
                KaAction::DpdDead => {
                    tracing::error!("detected dead peer");
                    Ok(WriteOutcome::Reconnect)
                }
                // Nothing further this tick, including on rekey.
                _ => {
                    self.current_pkt = Some(pkt);
                    Ok(WriteOutcome::Blocked)
                }
            },
            Ok(n) if n == wanted => Ok(WriteOutcome::Written),
            Ok(n) => {
                tracing::error!("transport wrote too few bytes: asked for {}, sent {}", wanted, n);
                self.quit_reason = Some("Internal error".to_string());
                Err(FrameError::ShortWrite { wanted, wrote: n }.into())
            }
            Err(e) => {
                tracing::debug!("transport write failed: {}", e);
                Ok(WriteOutcome::Reconnect)
            }
        }
    }

    fn fatal(&mut self, err: FrameError) -> crate::Error {
        if self.quit_reason.is_none() {
            self.quit_reason = Some(err.to_string());
        }
        Box::new(err)
    }
}
