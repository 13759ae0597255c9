/// Integration tests for the PPP session engine
///
/// Drives a session against an in-memory record-oriented transport and a
/// scripted peer. Covered scenarios:
/// 1. F5 outer decode and Configure-Ack emission
/// 2. Full negotiation to NETWORK, IPv4 only and dual stack
/// 3. Compressed data ingress after ACCOMP+PFCOMP
/// 4. Session termination on a malformed PPP header
/// 5. Magic number complement choice
/// 6. Configure-Request retransmit cadence
/// 7. Echo/Terminate handling and keepalive probes
use ppptun::codec::frame::Encap;
use ppptun::network::Transport;
use ppptun::network::keepalive::Keepalive;
use ppptun::network::tcp::TcpTransport;
use ppptun::packet::Packet;
use ppptun::session::config::IpInfo;
use ppptun::session::{Session, SessionState, Status};
use ppptun::tunnel::TunnelIo;
use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

const LCP: u16 = 0xc021;
const IPCP: u16 = 0x8021;
const IP6CP: u16 = 0x8057;

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Record-oriented loopback: each queued Vec is one transport read, the
/// way a TLS record carries exactly one frame.
#[derive(Default)]
struct LoopbackTransport {
    rx: VecDeque<Vec<u8>>,
    tx: Vec<Vec<u8>>,
    closed: bool,
    block_writes: bool,
}

impl Transport for LoopbackTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.rx.pop_front() {
            Some(record) => {
                assert!(record.len() <= buf.len(), "test record larger than rx buffer");
                buf[..record.len()].copy_from_slice(&record);
                Ok(record.len())
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.block_writes {
            return Ok(0);
        }
        self.tx.push(buf.to_vec());
        Ok(buf.len())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct Harness {
    session: Session,
    io: TunnelIo,
    transport: LoopbackTransport,
    now: Instant,
}

impl Harness {
    fn new(encap: Encap, want_ipv4: bool, want_ipv6: bool) -> Self {
        init_logs();
        let now = Instant::now();
        Self {
            session: Session::new(encap, want_ipv4, want_ipv6),
            io: TunnelIo::new(IpInfo::default(), Keepalive::new(now, None, None)),
            transport: LoopbackTransport::default(),
            now,
        }
    }

    fn with_keepalive(mut self, keepalive: Option<Duration>, dpd: Option<Duration>) -> Self {
        self.io.keepalive = Keepalive::new(self.now, keepalive, dpd);
        self
    }

    fn tick(&mut self, readable: bool) -> ppptun::Result<Status> {
        let mut timeout = Duration::from_secs(3600);
        self.tick_with_timeout(readable, &mut timeout)
    }

    fn tick_with_timeout(
        &mut self,
        readable: bool,
        timeout: &mut Duration,
    ) -> ppptun::Result<Status> {
        self.session
            .mainloop(&mut self.transport, &mut self.io, timeout, readable, self.now)
    }

    /// Calls the mainloop until it goes idle, so queued packets flush
    fn settle(&mut self) {
        for _ in 0..32 {
            match self.tick(!self.transport.rx.is_empty()).unwrap() {
                Status::Idle | Status::Done => return,
                Status::Work => {}
                Status::Reconnect => panic!("unexpected reconnect"),
            }
        }
        panic!("session did not settle");
    }

    fn feed(&mut self, frame: &[u8]) {
        self.transport.rx.push_back(frame.to_vec());
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    fn sent(&self) -> Vec<SentFrame> {
        self.transport.tx.iter().map(|f| parse_sent(f)).collect()
    }

    fn sent_with_code(&self, proto: u16, code: u8) -> Vec<SentFrame> {
        self.sent()
            .into_iter()
            .filter(|f| f.proto == proto && f.code == code)
            .collect()
    }

    /// Scripts a full peer-side LCP exchange: their request, their ack
    fn peer_opens_lcp(&mut self, peer_opts: &[u8]) {
        self.feed(&ctrl_frame(LCP, 1, 1, peer_opts));
        self.feed(&ctrl_frame(LCP, 2, 1, &[]));
        self.settle();
    }
}

fn f5(ppp: &[u8]) -> Vec<u8> {
    let mut frame = vec![0xf5, 0x00];
    frame.extend_from_slice(&(ppp.len() as u16).to_be_bytes());
    frame.extend_from_slice(ppp);
    frame
}

/// Builds a peer control frame with a full uncompressed PPP header
fn ctrl_frame(proto: u16, code: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut ppp = vec![0xff, 0x03];
    ppp.extend_from_slice(&proto.to_be_bytes());
    ppp.push(code);
    ppp.push(id);
    ppp.extend_from_slice(&((payload.len() + 4) as u16).to_be_bytes());
    ppp.extend_from_slice(payload);
    f5(&ppp)
}

#[derive(Debug)]
struct SentFrame {
    proto: u16,
    code: u8,
    id: u8,
    payload: Vec<u8>,
}

/// Decodes one frame our engine emitted, tolerating header compression
fn parse_sent(frame: &[u8]) -> SentFrame {
    assert_eq!(&frame[..2], &[0xf5, 0x00], "bad outer magic");
    let len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    assert_eq!(len, frame.len() - 4, "outer length mismatch");

    let mut ppp = &frame[4..];
    if ppp[0] == 0xff && ppp[1] == 0x03 {
        ppp = &ppp[2..];
    }
    let proto = if ppp[0] & 1 == 1 {
        let p = ppp[0] as u16;
        ppp = &ppp[1..];
        p
    } else {
        let p = u16::from_be_bytes([ppp[0], ppp[1]]);
        ppp = &ppp[2..];
        p
    };
    let claimed = u16::from_be_bytes([ppp[2], ppp[3]]) as usize;
    assert_eq!(claimed, ppp.len(), "config length mismatch");
    SentFrame {
        proto,
        code: ppp[0],
        id: ppp[1],
        payload: ppp[4..].to_vec(),
    }
}

/// Finds one TLV by tag in a Configure-Request payload
fn find_opt(payload: &[u8], tag: u8) -> Option<Vec<u8>> {
    let mut cur = 0;
    while cur + 1 < payload.len() {
        let l = payload[cur + 1] as usize;
        if l < 2 || cur + l > payload.len() {
            return None;
        }
        if payload[cur] == tag {
            return Some(payload[cur + 2..cur + l].to_vec());
        }
        cur += l;
    }
    None
}

#[test]
fn first_pass_emits_an_lcp_configure_request() {
    let mut h = Harness::new(Encap::F5, true, false);
    assert_eq!(h.tick(false).unwrap(), Status::Work);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    let req = &sent[0];
    assert_eq!((req.proto, req.code, req.id), (LCP, 1, 1));
    // MTU defaults to 1300 when the host supplied none.
    assert_eq!(find_opt(&req.payload, 1).unwrap(), vec![0x05, 0x14]);
    assert_eq!(find_opt(&req.payload, 2).unwrap(), vec![0, 0, 0, 0]);
    assert_ne!(find_opt(&req.payload, 5).unwrap(), vec![0, 0, 0, 0]);
    assert!(find_opt(&req.payload, 7).is_some());
    assert!(find_opt(&req.payload, 8).is_some());
    assert_eq!(h.session.state(), SessionState::Establish);
}

#[test]
fn f5_outer_decode_acks_the_peer_request() {
    // Scenario S1: a peer Configure-Request with MTU 1500.
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    h.feed(&[
        0xf5, 0x00, 0x00, 0x0e, 0xff, 0x03, 0xc0, 0x21, 0x01, 0x01, 0x00, 0x0a, 0x01, 0x04,
        0x05, 0xdc,
    ]);
    h.settle();

    assert_eq!(h.io.ip_info.mtu, 1500);
    let acks = h.sent_with_code(LCP, 2);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].id, 1);
    // The ack copies the request payload byte for byte.
    assert_eq!(acks[0].payload, vec![0x01, 0x04, 0x05, 0xdc]);
}

#[test]
fn negotiation_reaches_network_ipv4() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();
    h.peer_opens_lcp(&[]);
    assert!(h.session.state() >= SessionState::Opened);

    // The IPCP request goes out on the pass after LCP opens.
    let reqs = h.sent_with_code(IPCP, 1);
    assert_eq!(reqs.len(), 1);

    let mut peer_addr = vec![0x03, 0x06];
    peer_addr.extend_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
    h.feed(&ctrl_frame(IPCP, 1, 1, &peer_addr));
    h.feed(&ctrl_frame(IPCP, 2, 1, &[]));
    h.settle();
    h.tick(false).unwrap();

    assert_eq!(h.session.state(), SessionState::Network);
    assert_eq!(h.session.peer_addr(), Ipv4Addr::new(10, 0, 0, 1));
}

#[test]
fn dual_stack_waits_for_both_ncps() {
    let mut h = Harness::new(Encap::F5, true, true);
    h.tick(false).unwrap();
    h.peer_opens_lcp(&[]);

    h.feed(&ctrl_frame(IPCP, 1, 1, &[0x03, 0x06, 10, 0, 0, 1]));
    h.feed(&ctrl_frame(IPCP, 2, 1, &[]));
    h.settle();
    h.tick(false).unwrap();
    // IPv6 still outstanding.
    assert_ne!(h.session.state(), SessionState::Network);

    h.feed(&ctrl_frame(IP6CP, 1, 1, &[0x01, 0x0a, 1, 2, 3, 4, 5, 6, 7, 8]));
    h.feed(&ctrl_frame(IP6CP, 2, 1, &[]));
    h.settle();
    h.tick(false).unwrap();

    assert_eq!(h.session.state(), SessionState::Network);
    assert_eq!(h.session.peer_ipv6_int_ident(), [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn compressed_data_routes_to_the_incoming_queue() {
    // Scenario S2: after ACCOMP+PFCOMP, `21` is a whole PPP header.
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();
    h.peer_opens_lcp(&[0x07, 0x02, 0x08, 0x02]);
    h.feed(&ctrl_frame(IPCP, 1, 1, &[0x03, 0x06, 10, 0, 0, 1]));
    h.feed(&ctrl_frame(IPCP, 2, 1, &[]));
    h.settle();
    h.tick(false).unwrap();
    assert_eq!(h.session.state(), SessionState::Network);

    h.feed(&f5(&[0x21, 0x45, 0x00, 0x00]));
    h.settle();

    assert_eq!(h.io.incoming.len(), 1);
    assert_eq!(h.io.incoming[0].payload(), &[0x45, 0x00, 0x00]);
}

#[test]
fn data_before_network_is_dropped() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();
    // Full header, so it parses, but the session is still in ESTABLISH.
    h.feed(&f5(&[0xff, 0x03, 0x00, 0x21, 0x45, 0x00]));
    h.settle();
    assert!(h.io.incoming.is_empty());
    assert!(h.session.quit_reason().is_none());
}

#[test]
fn missing_address_control_terminates() {
    // Scenario S3: no ACCOMP negotiated, no FF 03 in front.
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    h.feed(&f5(&[0x21, 0x45, 0x00, 0x00]));
    let err = h.tick(true).unwrap_err();
    assert!(err.to_string().contains("bad incoming PPP packet"));
    assert_eq!(h.session.quit_reason(), Some("bad incoming PPP packet"));
}

#[test]
fn bad_outer_header_is_dropped_not_fatal() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    // Wrong magic, then a length that disagrees with the read.
    h.feed(&[0xf6, 0x00, 0x00, 0x04, 1, 2, 3, 4]);
    h.feed(&[0xf5, 0x00, 0x00, 0x07, 1, 2, 3, 4]);
    h.settle();

    assert!(h.session.quit_reason().is_none());
    assert_ne!(h.session.state(), SessionState::Terminate);
}

#[test]
fn magic_number_is_the_peers_complement() {
    // Scenario S4.
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    h.feed(&ctrl_frame(LCP, 1, 1, &[0x05, 0x06, 0xde, 0xad, 0xbe, 0xef]));
    h.settle();

    // The next request, here a retransmit, carries the complement.
    h.advance(Duration::from_secs(3));
    h.settle();
    let reqs = h.sent_with_code(LCP, 1);
    assert_eq!(reqs.len(), 2);
    assert_eq!(
        find_opt(&reqs[1].payload, 5).unwrap(),
        vec![0x21, 0x52, 0x41, 0x10]
    );
}

#[test]
fn configure_requests_retransmit_every_three_seconds() {
    // Scenario S5.
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    // The idle pass after the send folds the retransmit deadline into the
    // caller's timeout hint.
    let mut timeout = Duration::from_secs(3600);
    h.tick_with_timeout(false, &mut timeout).unwrap();
    assert!(timeout <= Duration::from_secs(3));

    h.advance(Duration::from_secs(1));
    h.settle();
    h.advance(Duration::from_secs(2));
    h.settle();
    h.advance(Duration::from_secs(1));
    h.settle();
    h.advance(Duration::from_secs(2));
    h.settle();

    // t=0, t=3, t=6: three requests, none in between.
    assert_eq!(h.sent_with_code(LCP, 1).len(), 3);
}

#[test]
fn ipv6_interface_identifier_comes_from_the_host_address() {
    // Scenario S6.
    let mut h = Harness::new(Encap::F5, false, true);
    h.io.ip_info.addr6 = Some("fe80::11:2233:4455:6677".parse::<Ipv6Addr>().unwrap());
    h.tick(false).unwrap();
    h.peer_opens_lcp(&[]);

    let reqs = h.sent_with_code(IP6CP, 1);
    assert_eq!(reqs.len(), 1);
    assert_eq!(
        find_opt(&reqs[0].payload, 1).unwrap(),
        vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]
    );
}

#[test]
fn echo_request_gets_one_reply_with_our_magic() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    // Before OPENED the request is consumed silently.
    h.feed(&ctrl_frame(LCP, 9, 41, &[1, 2, 3, 4]));
    h.settle();
    assert!(h.sent_with_code(LCP, 10).is_empty());

    h.peer_opens_lcp(&[]);
    h.feed(&ctrl_frame(LCP, 9, 42, &[1, 2, 3, 4]));
    h.settle();

    let our_magic = find_opt(&h.sent_with_code(LCP, 1)[0].payload, 5).unwrap();
    let replies = h.sent_with_code(LCP, 10);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].id, 42);
    assert_eq!(replies[0].payload, our_magic);
}

#[test]
fn terminate_request_acks_and_finishes_the_session() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    h.feed(&ctrl_frame(LCP, 5, 7, b"not allowed"));
    h.settle();

    let acks = h.sent_with_code(LCP, 6);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].id, 7);
    assert!(acks[0].payload.is_empty());
    assert_eq!(h.session.state(), SessionState::Terminate);
    assert_eq!(h.session.quit_reason(), Some("not allowed"));
    assert_eq!(h.tick(false).unwrap(), Status::Done);
}

#[test]
fn configure_reject_is_fatal() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    h.feed(&ctrl_frame(LCP, 4, 1, &[]));
    let err = h.tick(true).unwrap_err();
    assert!(err.to_string().contains("Configure-Reject"));
    assert!(h.session.quit_reason().unwrap().contains("Configure-Reject"));
}

#[test]
fn unknown_option_is_not_acked() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();

    // LCP option 13 with a 2-byte value.
    h.feed(&ctrl_frame(LCP, 1, 1, &[0x0d, 0x04, 0x00, 0x01]));
    assert!(h.tick(true).is_err());
    assert!(h.sent_with_code(LCP, 2).is_empty());
}

#[test]
fn closed_transport_requests_reconnect() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.transport.closed = true;
    assert_eq!(h.tick(false).unwrap(), Status::Reconnect);
}

#[test]
fn blocked_write_retries_the_identical_bytes() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.transport.block_writes = true;
    assert_eq!(h.tick(false).unwrap(), Status::Idle);
    assert!(h.transport.tx.is_empty());

    // Nothing new is queued while the first request is stuck.
    h.transport.block_writes = false;
    h.settle();
    assert_eq!(h.sent_with_code(LCP, 1).len(), 1);
}

#[test]
fn keepalive_sends_a_discard_request_when_idle() {
    let mut h =
        Harness::new(Encap::F5, true, false).with_keepalive(Some(Duration::from_secs(10)), None);
    h.tick(false).unwrap();
    h.peer_opens_lcp(&[]);
    h.feed(&ctrl_frame(IPCP, 1, 1, &[0x03, 0x06, 10, 0, 0, 1]));
    h.feed(&ctrl_frame(IPCP, 2, 1, &[]));
    h.settle();
    h.tick(false).unwrap();
    assert_eq!(h.session.state(), SessionState::Network);

    h.advance(Duration::from_secs(11));
    h.settle();

    let probes = h.sent_with_code(LCP, 11);
    assert_eq!(probes.len(), 1);
    assert!(probes[0].payload.is_empty());
}

#[test]
fn dpd_sends_an_echo_request_then_declares_death() {
    let mut h =
        Harness::new(Encap::F5, true, false).with_keepalive(None, Some(Duration::from_secs(30)));
    h.tick(false).unwrap();
    h.peer_opens_lcp(&[]);
    h.feed(&ctrl_frame(IPCP, 1, 1, &[0x03, 0x06, 10, 0, 0, 1]));
    h.feed(&ctrl_frame(IPCP, 2, 1, &[]));
    h.settle();
    h.tick(false).unwrap();

    h.advance(Duration::from_secs(31));
    h.settle();
    let probes = h.sent_with_code(LCP, 9);
    assert_eq!(probes.len(), 1);
    let our_magic = find_opt(&h.sent_with_code(LCP, 1)[0].payload, 5).unwrap();
    assert_eq!(probes[0].payload, our_magic);

    h.advance(Duration::from_secs(30));
    assert_eq!(h.tick(false).unwrap(), Status::Reconnect);
}

#[test]
fn hdlc_carrier_unescapes_inbound_frames() {
    let mut h = Harness::new(Encap::F5Hdlc, true, false);
    h.tick(false).unwrap();

    // A peer LCP Configure-Request with MTU 1500, HDLC-framed. The 0x04
    // length byte needs stuffing under the default map.
    let ppp = [
        0xff, 0x03, 0xc0, 0x21, 0x01, 0x01, 0x00, 0x08, 0x01, 0x7d, 0x24, 0x05, 0xdc,
    ];
    let mut frame = vec![0x7e];
    frame.extend_from_slice(&ppp);
    frame.push(0x7e);
    h.feed(&frame);
    h.settle();

    assert_eq!(h.io.ip_info.mtu, 1500);
    // No outer header on the HDLC carrier.
    let reply = &h.transport.tx[1];
    assert_eq!(&reply[..4], &[0xff, 0x03, 0xc0, 0x21]);
    assert_eq!(reply[4], 2);
}

#[test]
fn outgoing_ip_traffic_flows_in_network_only() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.io.outgoing.push_back(Packet::data(&[0x45, 0x00, 0x00, 0x14]));
    h.tick(false).unwrap();
    // Still queued: the session is not in NETWORK yet.
    assert_eq!(h.io.outgoing.len(), 1);

    h.peer_opens_lcp(&[0x07, 0x02, 0x08, 0x02]);
    h.feed(&ctrl_frame(IPCP, 1, 1, &[0x03, 0x06, 10, 0, 0, 1]));
    h.feed(&ctrl_frame(IPCP, 2, 1, &[]));
    h.settle();
    h.settle();

    assert!(h.io.outgoing.is_empty());
    // We advertised ACCOMP+PFCOMP, so the data frame header is one byte.
    let frame = h.transport.tx.last().unwrap();
    assert_eq!(&frame[..2], &[0xf5, 0x00]);
    assert_eq!(&frame[4..], &[0x21, 0x45, 0x00, 0x00, 0x14]);
}

#[test]
fn egress_compression_follows_our_own_request() {
    // The peer advertises neither compression; ours still apply to the
    // frames we send, because our Configure-Request asked for both.
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();
    h.peer_opens_lcp(&[]);
    h.feed(&ctrl_frame(IPCP, 1, 1, &[0x03, 0x06, 10, 0, 0, 1]));
    h.feed(&ctrl_frame(IPCP, 2, 1, &[]));
    h.settle();
    h.tick(false).unwrap();
    assert_eq!(h.session.state(), SessionState::Network);

    h.io.outgoing.push_back(Packet::data(&[0x45, 0x00, 0x00, 0x14]));
    h.settle();

    let frame = h.transport.tx.last().unwrap();
    assert_eq!(&frame[..4], &[0xf5, 0x00, 0x00, 0x05]);
    assert_eq!(&frame[4..], &[0x21, 0x45, 0x00, 0x00, 0x14]);
}

#[test]
fn dtls_side_channel_parks_the_data_queue() {
    let mut h = Harness::new(Encap::F5, true, false);
    h.tick(false).unwrap();
    h.peer_opens_lcp(&[]);
    h.feed(&ctrl_frame(IPCP, 1, 1, &[0x03, 0x06, 10, 0, 0, 1]));
    h.feed(&ctrl_frame(IPCP, 2, 1, &[]));
    h.settle();
    h.tick(false).unwrap();

    h.io.dtls_connected = true;
    h.io.outgoing.push_back(Packet::data(&[0x45, 0x00]));
    h.settle();
    assert_eq!(h.io.outgoing.len(), 1);
}

#[tokio::test]
async fn tcp_transport_carries_the_first_request() {
    init_logs();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let mut transport = TcpTransport::new(client);
    let mut session = Session::new(Encap::F5, true, false);
    let mut io = TunnelIo::new(IpInfo::default(), Keepalive::new(Instant::now(), None, None));
    let mut timeout = Duration::from_secs(60);

    let status = session
        .mainloop(&mut transport, &mut io, &mut timeout, false, Instant::now())
        .unwrap();
    assert_eq!(status, Status::Work);

    use tokio::io::AsyncReadExt;
    let mut buf = vec![0u8; 256];
    let n = server.read(&mut buf).await.unwrap();
    let sent = parse_sent(&buf[..n]);
    assert_eq!((sent.proto, sent.code), (LCP, 1));
}
