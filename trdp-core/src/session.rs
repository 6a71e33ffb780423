//! Session (C1, spec §4.1): owns one local IP binding's sockets, the
//! traffic store, and the PD/MD engines; multiplexes both over a single
//! `mio::Poll`, grounded on `Endpoint` in
//! `lib/neutronium/src/net/endpoint.rs` (poll + per-connection table +
//! free list) and the buffer-pool pattern in `t51core`'s chunk pool.
//!
//! `getInterval`/`process` (spec §4.1) become `next_deadline`/`process`;
//! see DESIGN.md "OQ-1" for why that is the idiomatic substitute rather
//! than a literal fd-set return value.

use crate::config::SessionConfig;
use crate::error::{TrdpError, TrdpResult};
use crate::md::session_table::{Transport, Uuid};
use crate::md::{ListenerFlags, ListenerId, MdEngine, MdEvent, MdOutgoing};
use crate::pd::store::TrafficStore;
use crate::pd::{PdEngine, PdEvent, PdOutgoing, PublisherId, SubscriberId, TimeoutPolicy};
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};
use trdp_wire::header::MdHeader;
use trdp_wire::marshal::{DatasetDescriptor, DatasetRegistry, DatasetValue};

const PD_TOKEN: Token = Token(0);
const MD_UDP_TOKEN: Token = Token(1);
const MD_LISTENER_TOKEN: Token = Token(2);
const TCP_STREAM_TOKEN_BASE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Pd(PdEvent),
    Md(MdEvent),
}

struct TcpConn {
    stream: TcpStream,
    token: Token,
    out_buf: VecDeque<u8>,
    in_buf: Vec<u8>,
    last_traffic: Instant,
}

/// An application's binding to one local IP (spec §4.1).
pub struct Session {
    logger: slog::Logger,
    local_ip: Ipv4Addr,
    config: SessionConfig,
    registry: Box<dyn DatasetRegistry + Send>,

    poll: Poll,
    events: Events,

    pd_socket: UdpSocket,
    md_udp_socket: UdpSocket,
    md_listener: TcpListener,
    md_streams: HashMap<Ipv4Addr, TcpConn>,
    next_token: usize,

    store: TrafficStore,
    pd: PdEngine,
    md: MdEngine,
}

impl Session {
    /// spec §4.1 `open()`. Fails with `SockErr` if binding fails,
    /// `MemErr` if the arena cannot be carved (never happens for the
    /// `Vec`-backed free list used here, kept for API fidelity).
    pub fn open(
        local_ip: Ipv4Addr,
        config: SessionConfig,
        registry: Box<dyn DatasetRegistry + Send>,
        logger: Option<slog::Logger>,
    ) -> TrdpResult<Session> {
        let logger = logger.unwrap_or_else(|| slog::Logger::root(slog::Discard, slog::o!()));
        let poll = Poll::new().map_err(TrdpError::from)?;

        let pd_addr = SocketAddr::V4(SocketAddrV4::new(local_ip, config.pd.port));
        let mut pd_socket = UdpSocket::bind(pd_addr).map_err(|_| TrdpError::SockErr)?;
        poll.registry()
            .register(&mut pd_socket, PD_TOKEN, Interest::READABLE)
            .map_err(TrdpError::from)?;

        let md_addr = SocketAddr::V4(SocketAddrV4::new(local_ip, config.md.udp_port));
        let mut md_udp_socket = UdpSocket::bind(md_addr).map_err(|_| TrdpError::SockErr)?;
        poll.registry()
            .register(&mut md_udp_socket, MD_UDP_TOKEN, Interest::READABLE)
            .map_err(TrdpError::from)?;

        let tcp_addr = SocketAddr::V4(SocketAddrV4::new(local_ip, config.md.tcp_port));
        let mut md_listener = TcpListener::bind(tcp_addr).map_err(|_| TrdpError::SockErr)?;
        poll.registry()
            .register(&mut md_listener, MD_LISTENER_TOKEN, Interest::READABLE)
            .map_err(TrdpError::from)?;

        Ok(Session {
            logger,
            local_ip,
            pd: PdEngine::new(config.pd.clone()),
            md: MdEngine::new(config.md.clone(), local_ip),
            config,
            registry,
            poll,
            events: Events::with_capacity(1024),
            pd_socket,
            md_udp_socket,
            md_listener,
            md_streams: HashMap::new(),
            next_token: TCP_STREAM_TOKEN_BASE,
            store: TrafficStore::new(),
        })
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    pub fn set_redundant(&mut self, red_id: u32, leader: bool) {
        self.pd.set_redundant(red_id, leader);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &mut self,
        com_id: u32,
        dest_ip: Ipv4Addr,
        interval: Duration,
        red_id: u32,
        dataset: DatasetDescriptor,
        initial: &[DatasetValue],
    ) -> TrdpResult<PublisherId> {
        self.pd.publish(
            &mut self.store,
            self.registry.as_ref(),
            com_id,
            dest_ip,
            interval,
            red_id,
            dataset,
            initial,
            Instant::now(),
        )
    }

    pub fn unpublish(&mut self, id: PublisherId) -> TrdpResult<()> {
        self.pd.unpublish(&mut self.store, id)
    }

    pub fn write_published(&mut self, id: PublisherId, values: &[DatasetValue]) -> TrdpResult<()> {
        self.pd.write(&mut self.store, self.registry.as_ref(), id, values)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        &mut self,
        com_id: u32,
        src_ip: Option<Ipv4Addr>,
        dest_ip: Ipv4Addr,
        timeout: Duration,
        policy: TimeoutPolicy,
        dataset: DatasetDescriptor,
        slot_size: usize,
    ) -> TrdpResult<SubscriberId> {
        self.pd.subscribe(
            &mut self.store,
            com_id,
            src_ip,
            dest_ip,
            timeout,
            policy,
            dataset,
            slot_size,
            Instant::now(),
        )
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> TrdpResult<()> {
        self.pd.unsubscribe(&mut self.store, id)
    }

    pub fn read_subscription(&self, id: SubscriberId) -> &[u8] {
        self.pd.read(&self.store, id)
    }

    /// spec §4.2 "Pull": sends the request datagram immediately.
    pub fn request_pull(&mut self, com_id: u32, reply_com_id: u32, dest_ip: Ipv4Addr) -> TrdpResult<()> {
        let outgoing = self.pd.request_pull(com_id, reply_com_id, dest_ip);
        self.send_pd(outgoing)
    }

    pub fn add_listener(
        &mut self,
        com_id: u32,
        src_ip: Option<Ipv4Addr>,
        dest_ip: Option<Ipv4Addr>,
        dest_uri: String,
        user_ref: u64,
        flags: ListenerFlags,
    ) -> TrdpResult<ListenerId> {
        self.md.add_listener(com_id, src_ip, dest_ip, dest_uri, user_ref, flags)
    }

    pub fn delete_listener(&mut self, id: ListenerId) -> TrdpResult<()> {
        self.md.delete_listener(id)
    }

    pub fn notify(&mut self, com_id: u32, dest_ip: Ipv4Addr, source_uri: &str, dest_uri: &str, payload: &[u8]) -> TrdpResult<()> {
        let outgoing = self.md.notify(com_id, dest_ip, source_uri, dest_uri, payload);
        self.send_md(outgoing)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn request(
        &mut self,
        com_id: u32,
        dest_ip: Ipv4Addr,
        source_uri: &str,
        dest_uri: &str,
        num_expected_replies: u32,
        transport: Transport,
        reply_timeout: Duration,
        payload: &[u8],
    ) -> TrdpResult<Uuid> {
        let (uuid, outgoing) = self.md.request(
            com_id, dest_ip, source_uri, dest_uri, num_expected_replies, transport, reply_timeout, payload, Instant::now(),
        )?;
        self.send_md(outgoing)?;
        Ok(uuid)
    }

    pub fn reply(&mut self, uuid: Uuid, payload: &[u8]) -> TrdpResult<()> {
        let outgoing = self.md.reply(uuid, payload)?;
        self.send_md(outgoing)
    }

    pub fn reply_query(&mut self, uuid: Uuid, payload: &[u8]) -> TrdpResult<()> {
        let outgoing = self.md.reply_query(uuid, payload, Instant::now())?;
        self.send_md(outgoing)
    }

    pub fn confirm(&mut self, uuid: Uuid) -> TrdpResult<()> {
        let outgoing = self.md.confirm(uuid)?;
        self.send_md(outgoing)
    }

    pub fn abort_session(&mut self, uuid: Uuid) -> Option<MdEvent> {
        self.md.abort_session(uuid)
    }

    /// spec §4.1 `getInterval`: earliest pending deadline, side-effect free.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        match (self.pd.next_deadline(now), self.md.next_deadline(now)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// spec §4.1 `process`: polls for up to `min(budget, next_deadline)`,
    /// dispatches ready sockets, then advances scheduled PD sends and MD
    /// timeouts for the current instant.
    pub fn process(&mut self, budget: Option<Duration>) -> TrdpResult<Vec<SessionEvent>> {
        let now = Instant::now();
        let wait = match (budget, self.next_deadline(now)) {
            (Some(b), Some(d)) => Some(b.min(d)),
            (Some(b), None) => Some(b),
            (None, d) => d,
        };

        self.poll.poll(&mut self.events, wait).map_err(TrdpError::from)?;

        let mut session_events = Vec::new();
        let tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
        for token in tokens {
            match token {
                PD_TOKEN => self.drain_pd_socket(&mut session_events)?,
                MD_UDP_TOKEN => self.drain_md_udp_socket(&mut session_events)?,
                MD_LISTENER_TOKEN => self.accept_tcp_connections()?,
                t => self.service_tcp_stream(t, &mut session_events)?,
            }
        }

        let now = Instant::now();
        let mut pd_events = Vec::new();
        let outgoing = self.pd.tick(&mut self.store, now, &mut pd_events);
        for datagram in outgoing {
            self.send_pd(datagram)?;
        }
        session_events.extend(pd_events.into_iter().map(SessionEvent::Pd));

        let (md_outgoing, md_events) = self.md.tick(now);
        for datagram in md_outgoing {
            self.send_md(datagram)?;
        }
        session_events.extend(md_events.into_iter().map(SessionEvent::Md));

        Ok(session_events)
    }

    /// spec §4.1 `close`: aborts open MD sessions, releases sockets
    /// (dropped with `self`).
    pub fn close(mut self) -> TrdpResult<()> {
        for uuid in self.md.open_session_uuids() {
            self.md.abort_session(uuid);
        }
        slog::debug!(self.logger, "session closed"; "local_ip" => %self.local_ip);
        Ok(())
    }

    fn drain_pd_socket(&mut self, events: &mut Vec<SessionEvent>) -> TrdpResult<()> {
        let mut buf = [0u8; 2048];
        loop {
            match self.pd_socket.recv_from(&mut buf) {
                Ok((n, SocketAddr::V4(src))) => {
                    let now = Instant::now();
                    let (outgoing, event) = self.pd.receive(&mut self.store, &buf[..n], *src.ip(), self.local_ip, now);
                    if let Some(outgoing) = outgoing {
                        self.send_pd(outgoing)?;
                    }
                    match event {
                        Some(event) => events.push(SessionEvent::Pd(event)),
                        None => slog::debug!(self.logger, "dropped malformed or unmatched PD datagram"; "src" => %src),
                    }
                }
                Ok((_, SocketAddr::V6(_))) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(TrdpError::from(e)),
            }
        }
        Ok(())
    }

    fn drain_md_udp_socket(&mut self, events: &mut Vec<SessionEvent>) -> TrdpResult<()> {
        let mut buf = [0u8; 65536];
        loop {
            match self.md_udp_socket.recv_from(&mut buf) {
                Ok((n, SocketAddr::V4(src))) => {
                    let now = Instant::now();
                    let (outgoing, event) =
                        self.md.receive(&buf[..n], *src.ip(), self.local_ip, Transport::Udp, now);
                    if let Some(datagram) = outgoing {
                        self.send_md(datagram)?;
                    }
                    if let Some(event) = event {
                        events.push(SessionEvent::Md(event));
                    } else {
                        slog::debug!(self.logger, "dropped malformed MD datagram"; "src" => %src);
                    }
                }
                Ok((_, SocketAddr::V6(_))) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(TrdpError::from(e)),
            }
        }
        Ok(())
    }

    fn accept_tcp_connections(&mut self) -> TrdpResult<()> {
        loop {
            match self.md_listener.accept() {
                Ok((stream, SocketAddr::V4(peer))) => {
                    self.register_tcp_stream(*peer.ip(), stream)?;
                }
                Ok((_, SocketAddr::V6(_))) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(TrdpError::from(e)),
            }
        }
        Ok(())
    }

    fn register_tcp_stream(&mut self, peer: Ipv4Addr, mut stream: TcpStream) -> TrdpResult<()> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
            .map_err(TrdpError::from)?;
        self.md_streams.insert(
            peer,
            TcpConn { stream, token, out_buf: VecDeque::new(), in_buf: Vec::new(), last_traffic: Instant::now() },
        );
        Ok(())
    }

    fn ensure_tcp_conn(&mut self, peer: Ipv4Addr) -> TrdpResult<()> {
        if self.md_streams.contains_key(&peer) {
            return Ok(());
        }
        let addr = SocketAddr::V4(SocketAddrV4::new(peer, self.config.md.tcp_port));
        let stream = TcpStream::connect(addr).map_err(|_| TrdpError::SockErr)?;
        self.register_tcp_stream(peer, stream)
    }

    fn service_tcp_stream(&mut self, token: Token, events: &mut Vec<SessionEvent>) -> TrdpResult<()> {
        let peer = match self.md_streams.iter().find(|(_, c)| c.token == token).map(|(ip, _)| *ip) {
            Some(p) => p,
            None => return Ok(()),
        };

        let mut disconnect = false;
        let mut frames = Vec::new();
        if let Some(conn) = self.md_streams.get_mut(&peer) {
            let mut chunk = [0u8; 4096];
            loop {
                match conn.stream.read(&mut chunk) {
                    Ok(0) => {
                        disconnect = true;
                        break;
                    }
                    Ok(n) => {
                        conn.in_buf.extend_from_slice(&chunk[..n]);
                        conn.last_traffic = Instant::now();
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        disconnect = true;
                        break;
                    }
                }
            }

            while let Some(frame_len) = Self::complete_frame_len(&conn.in_buf) {
                frames.push(conn.in_buf.drain(..frame_len).collect::<Vec<u8>>());
            }
        }

        for frame in frames {
            let now = Instant::now();
            let (outgoing, event) = self.md.receive(&frame, peer, self.local_ip, Transport::Tcp, now);
            if let Some(event) = event {
                events.push(SessionEvent::Md(event));
            }
            if let Some(datagram) = outgoing {
                self.send_md(datagram)?;
            }
        }

        if let Some(conn) = self.md_streams.get_mut(&peer) {
            while !conn.out_buf.is_empty() {
                let (front, _) = conn.out_buf.as_slices();
                match conn.stream.write(front) {
                    Ok(0) => break,
                    Ok(n) => {
                        conn.out_buf.drain(..n);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        disconnect = true;
                        break;
                    }
                }
            }
        }

        if disconnect {
            self.md_streams.remove(&peer);
            // spec §4.4 "TCP transport": every open session bound to this
            // peer receives IO_ERR.
            for uuid in self.md.sessions_bound_to(peer) {
                if let Some(event) = self.md.fail_session(uuid) {
                    events.push(SessionEvent::Md(event));
                }
            }
        }
        Ok(())
    }

    /// A full MD frame is the 116-byte header plus, when `datasetLength >
    /// 0`, the 4-byte-padded payload and its 4-byte body CRC (spec §4.7).
    fn complete_frame_len(buf: &[u8]) -> Option<usize> {
        if buf.len() < MdHeader::SIZE {
            return None;
        }
        let header = MdHeader::decode(&buf[..MdHeader::SIZE]).ok()?;
        let payload_len = header.prefix.dataset_length as usize;
        let body_len = if payload_len == 0 { 0 } else { payload_len.div_ceil(4) * 4 + 4 };
        let total = MdHeader::SIZE + body_len;
        if buf.len() >= total {
            Some(total)
        } else {
            None
        }
    }

    fn send_pd(&mut self, outgoing: PdOutgoing) -> TrdpResult<()> {
        let addr = SocketAddr::V4(SocketAddrV4::new(outgoing.dest_ip, self.pd.config().port));
        self.pd_socket.send_to(&outgoing.bytes, addr).map_err(TrdpError::from)?;
        Ok(())
    }

    fn send_md(&mut self, outgoing: MdOutgoing) -> TrdpResult<()> {
        match outgoing.transport {
            Transport::Udp => {
                let addr = SocketAddr::V4(SocketAddrV4::new(outgoing.dest_ip, self.config.md.udp_port));
                self.md_udp_socket.send_to(&outgoing.bytes, addr).map_err(TrdpError::from)?;
                Ok(())
            }
            Transport::Tcp => {
                self.ensure_tcp_conn(outgoing.dest_ip)?;
                if let Some(conn) = self.md_streams.get_mut(&outgoing.dest_ip) {
                    conn.out_buf.extend(outgoing.bytes);
                    while !conn.out_buf.is_empty() {
                        let (front, _) = conn.out_buf.as_slices();
                        match conn.stream.write(front) {
                            Ok(0) => break,
                            Ok(n) => {
                                conn.out_buf.drain(..n);
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                            Err(e) => return Err(TrdpError::from(e)),
                        }
                    }
                }
                Ok(())
            }
        }
    }
}
