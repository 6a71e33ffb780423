//! MD Engine (C4, spec §4.4): per-dialog state machines for Mn/Mr/Mp/Mq/Mc/Me
//! exchanges, listener demultiplexing, and UDP retransmission.

pub mod listener;
pub mod session_table;

use crate::config::MdConfig;
use crate::error::{TrdpError, TrdpResult};
use listener::ListenerTable;
use session_table::{MdRole, MdSession, MdState, SessionTable, Transport, Uuid};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use trdp_wire::header::{CommonPrefix, MdExtension, MdHeader, PROTOCOL_VERSION};

pub use listener::{ListenerFlags, ListenerId};

fn uri_bytes(s: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let bytes = s.as_bytes();
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn uri_string(bytes: &[u8; 32]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Mn,
    Mr,
    Mp,
    Mq,
    Mc,
    Me,
}

impl MsgType {
    fn wire(self) -> [u8; 2] {
        match self {
            MsgType::Mn => *b"Mn",
            MsgType::Mr => *b"Mr",
            MsgType::Mp => *b"Mp",
            MsgType::Mq => *b"Mq",
            MsgType::Mc => *b"Mc",
            MsgType::Me => *b"Me",
        }
    }

    fn from_wire(bytes: [u8; 2]) -> Option<MsgType> {
        match &bytes {
            b"Mn" => Some(MsgType::Mn),
            b"Mr" => Some(MsgType::Mr),
            b"Mp" => Some(MsgType::Mp),
            b"Mq" => Some(MsgType::Mq),
            b"Mc" => Some(MsgType::Mc),
            b"Me" => Some(MsgType::Me),
            _ => None,
        }
    }
}

pub struct MdOutgoing {
    pub dest_ip: Ipv4Addr,
    pub transport: Transport,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdResult {
    Ok,
    ReplyTimeout,
    ConfirmTimeout,
    ReqConfirmTimeout,
    Aborted,
    NoListener,
    /// Transport (TCP peer) broke before the dialog reached a terminal
    /// state — distinct from a caller-initiated `Aborted` (spec §7).
    IoErr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdEvent {
    Request { uuid: Uuid, com_id: u32, payload: Vec<u8> },
    Reply { uuid: Uuid, payload: Vec<u8> },
    ReplyQuery { uuid: Uuid, payload: Vec<u8> },
    Confirmed { uuid: Uuid },
    Final { uuid: Uuid, result: MdResult },
}

pub struct MdEngine {
    config: MdConfig,
    local_ip: Ipv4Addr,
    listeners: ListenerTable,
    sessions: SessionTable,
    etb_topo_count: u32,
    op_trn_topo_count: u32,
    recent_uuids: Vec<Uuid>,
}

impl MdEngine {
    pub fn new(config: MdConfig, local_ip: Ipv4Addr) -> Self {
        let max = config.max_num_sessions;
        MdEngine {
            config,
            local_ip,
            listeners: ListenerTable::new(),
            sessions: SessionTable::new(max),
            etb_topo_count: 0,
            op_trn_topo_count: 0,
            recent_uuids: Vec::new(),
        }
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
        self.listeners.add(com_id, src_ip, dest_ip, dest_uri, user_ref, flags)
    }

    pub fn delete_listener(&mut self, id: ListenerId) -> TrdpResult<()> {
        self.listeners.remove(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_header(
        &self,
        msg_type: MsgType,
        com_id: u32,
        uuid: Uuid,
        reply_timeout: Duration,
        source_uri: &str,
        dest_uri: &str,
        payload_len: usize,
    ) -> MdHeader {
        MdHeader {
            prefix: CommonPrefix {
                sequence_counter: 0,
                protocol_version: PROTOCOL_VERSION,
                msg_type: msg_type.wire(),
                com_id,
                etb_topo_count: self.etb_topo_count,
                op_trn_topo_count: self.op_trn_topo_count,
                dataset_length: payload_len as u32,
            },
            ext: MdExtension {
                reply_status: 0,
                session_id: uuid,
                reply_timeout: reply_timeout.as_micros() as u32,
                source_uri: uri_bytes(source_uri),
                dest_uri: uri_bytes(dest_uri),
            },
        }
    }

    fn frame(&self, header: &MdHeader, payload: &[u8]) -> Vec<u8> {
        let mut body = payload.to_vec();
        trdp_wire::header::append_body_crc(&mut body);
        let mut datagram = header.encode();
        datagram.extend_from_slice(&body);
        datagram
    }

    fn new_uuid(&self) -> Uuid {
        // Node id substitutes the host MAC (unavailable without elevated
        // privileges) with the session's local IPv4 address; see
        // DESIGN.md "MAC address substitution".
        let context = uuid::timestamp::context::NoContext;
        let ts = uuid::Timestamp::now(context);
        let octets = self.local_ip.octets();
        let node_id = [octets[0], octets[1], octets[2], octets[3], 0, 0];
        uuid::Uuid::new_v1(ts, &node_id).into_bytes()
    }

    /// Mn: fire-and-forget, no session state kept (spec §4.4).
    pub fn notify(
        &self,
        com_id: u32,
        dest_ip: Ipv4Addr,
        source_uri: &str,
        dest_uri: &str,
        payload: &[u8],
    ) -> MdOutgoing {
        let header = self.build_header(MsgType::Mn, com_id, [0; 16], Duration::ZERO, source_uri, dest_uri, payload.len());
        MdOutgoing { dest_ip, transport: Transport::Udp, bytes: self.frame(&header, payload) }
    }

    /// Mr: opens an initiator-side session (spec §4.4 "IDLE --request-->").
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
        now: Instant,
    ) -> TrdpResult<(Uuid, MdOutgoing)> {
        let uuid = self.new_uuid();
        let header = self.build_header(MsgType::Mr, com_id, uuid, reply_timeout, source_uri, dest_uri, payload.len());
        let bytes = self.frame(&header, payload);
        let session = MdSession {
            uuid,
            role: MdRole::Initiator,
            state: MdState::ReqSent,
            com_id,
            peer_ip: dest_ip,
            transport,
            reply_timeout,
            confirm_timeout: self.config.confirm_timeout,
            created: now,
            last_activity: now,
            num_expected_replies,
            num_replies: 0,
            num_replies_query: 0,
            num_confirm_sent: 0,
            num_confirm_timeout: 0,
            num_retries: 0,
            num_retries_max: 3,
            pending_frame: bytes.clone(),
        };
        self.sessions.insert(session)?;
        Ok((uuid, MdOutgoing { dest_ip, transport, bytes }))
    }

    /// Mp: responder replies without expecting confirmation.
    pub fn reply(&mut self, uuid: Uuid, payload: &[u8]) -> TrdpResult<MdOutgoing> {
        let session = self.sessions.get_mut(&uuid).ok_or(TrdpError::ParamErr)?;
        if session.role != MdRole::Responder || session.state != MdState::ReqRecvd {
            return Err(TrdpError::ParamErr);
        }
        let com_id = session.com_id;
        let dest_ip = session.peer_ip;
        let transport = session.transport;
        session.state = MdState::Done;
        let header = self.build_header(MsgType::Mp, com_id, uuid, Duration::ZERO, "", "", payload.len());
        Ok(MdOutgoing { dest_ip, transport, bytes: self.frame(&header, payload) })
    }

    /// Mq: responder replies and awaits a confirmation.
    pub fn reply_query(&mut self, uuid: Uuid, payload: &[u8], now: Instant) -> TrdpResult<MdOutgoing> {
        let session = self.sessions.get_mut(&uuid).ok_or(TrdpError::ParamErr)?;
        if session.role != MdRole::Responder || session.state != MdState::ReqRecvd {
            return Err(TrdpError::ParamErr);
        }
        let com_id = session.com_id;
        let dest_ip = session.peer_ip;
        let transport = session.transport;
        session.state = MdState::AwaitConfirmRecv;
        session.last_activity = now;
        let header = self.build_header(MsgType::Mq, com_id, uuid, Duration::ZERO, "", "", payload.len());
        Ok(MdOutgoing { dest_ip, transport, bytes: self.frame(&header, payload) })
    }

    /// Mc: initiator confirms a received Mq.
    pub fn confirm(&mut self, uuid: Uuid) -> TrdpResult<MdOutgoing> {
        let session = self.sessions.get_mut(&uuid).ok_or(TrdpError::ParamErr)?;
        if session.role != MdRole::Initiator || session.state != MdState::AwaitConfirmSend {
            return Err(TrdpError::ParamErr);
        }
        let com_id = session.com_id;
        let dest_ip = session.peer_ip;
        let transport = session.transport;
        session.state = MdState::Done;
        session.num_confirm_sent += 1;
        let header = self.build_header(MsgType::Mc, com_id, uuid, Duration::ZERO, "", "", 0);
        self.sessions.remove_if_terminal(&uuid);
        Ok(MdOutgoing { dest_ip, transport, bytes: self.frame(&header, &[]) })
    }

    /// Earliest pending deadline across every open MD session (reply,
    /// confirm or retry), mirroring `PdEngine::next_deadline`.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        let mut earliest: Option<Instant> = None;
        let mut push = |deadline: Instant| {
            earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
        };
        for session in self.sessions_iter() {
            match (session.role, session.state) {
                (MdRole::Initiator, MdState::ReqSent) => {
                    push(session.created + session.reply_timeout);
                    if session.transport == Transport::Udp && session.num_retries < session.num_retries_max {
                        push(session.last_activity + session.reply_timeout / (session.num_retries_max + 1));
                    }
                }
                (MdRole::Initiator, MdState::AwaitConfirmSend) => {
                    push(session.last_activity + session.confirm_timeout);
                }
                (MdRole::Responder, MdState::AwaitConfirmRecv) => {
                    push(session.last_activity + session.confirm_timeout);
                }
                _ => {}
            }
        }
        earliest.map(|d| d.saturating_duration_since(now))
    }

    fn sessions_iter(&self) -> impl Iterator<Item = &MdSession> {
        self.sessions.iter()
    }

    pub fn abort_session(&mut self, uuid: Uuid) -> Option<MdEvent> {
        let session = self.sessions.force_remove(&uuid)?;
        let _ = session;
        Some(MdEvent::Final { uuid, result: MdResult::Aborted })
    }

    /// Same removal as `abort_session`, but for a broken transport rather
    /// than a caller-initiated abort (spec §4.4 "TCP transport": every open
    /// session bound to a disconnected peer receives IO_ERR).
    pub fn fail_session(&mut self, uuid: Uuid) -> Option<MdEvent> {
        let session = self.sessions.force_remove(&uuid)?;
        let _ = session;
        Some(MdEvent::Final { uuid, result: MdResult::IoErr })
    }

    /// Timeout and UDP-retry sweep (spec §4.4 and §4.4 "UDP retransmission").
    pub fn tick(&mut self, now: Instant) -> (Vec<MdOutgoing>, Vec<MdEvent>) {
        let mut outgoing = Vec::new();
        let mut events = Vec::new();
        let mut terminal = Vec::new();

        for session in self.sessions.iter_mut() {
            match (session.role, session.state) {
                (MdRole::Initiator, MdState::ReqSent) => {
                    if now.duration_since(session.created) >= session.reply_timeout {
                        session.state = MdState::Done;
                        events.push(MdEvent::Final { uuid: session.uuid, result: MdResult::ReplyTimeout });
                        terminal.push(session.uuid);
                    } else if session.transport == Transport::Udp
                        && session.num_retries < session.num_retries_max
                        && now.duration_since(session.last_activity)
                            >= session.reply_timeout / (session.num_retries_max + 1)
                    {
                        session.num_retries += 1;
                        session.last_activity = now;
                        outgoing.push(MdOutgoing {
                            dest_ip: session.peer_ip,
                            transport: session.transport,
                            bytes: session.pending_frame.clone(),
                        });
                    }
                }
                (MdRole::Initiator, MdState::AwaitConfirmSend)
                    if now.duration_since(session.last_activity) >= session.confirm_timeout =>
                {
                    session.state = MdState::Done;
                    session.num_confirm_timeout += 1;
                    events.push(MdEvent::Final { uuid: session.uuid, result: MdResult::ConfirmTimeout });
                    terminal.push(session.uuid);
                }
                (MdRole::Responder, MdState::AwaitConfirmRecv)
                    if now.duration_since(session.last_activity) >= session.confirm_timeout =>
                {
                    session.state = MdState::Done;
                    events.push(MdEvent::Final { uuid: session.uuid, result: MdResult::ReqConfirmTimeout });
                    terminal.push(session.uuid);
                }
                _ => {}
            }
        }

        for uuid in terminal {
            self.sessions.remove_if_terminal(&uuid);
        }
        (outgoing, events)
    }

    /// Listener demux for Mn/Mr, session-UUID demux for Mp/Mq/Mc/Me
    /// (spec §4.4 "Listener demux").
    pub fn receive(
        &mut self,
        bytes: &[u8],
        src_ip: Ipv4Addr,
        dest_ip: Ipv4Addr,
        transport: Transport,
        now: Instant,
    ) -> (Option<MdOutgoing>, Option<MdEvent>) {
        if bytes.len() < MdHeader::SIZE {
            return (None, None);
        }
        let header = match MdHeader::decode(&bytes[..MdHeader::SIZE]) {
            Ok(h) => h,
            Err(_) => return (None, None),
        };
        let payload = match trdp_wire::header::split_body_crc(&bytes[MdHeader::SIZE..]) {
            Ok(p) => {
                let len = (header.prefix.dataset_length as usize).min(p.len());
                p[..len].to_vec()
            }
            Err(_) => return (None, None),
        };
        let msg_type = match MsgType::from_wire(header.prefix.msg_type) {
            Some(t) => t,
            None => return (None, None),
        };

        match msg_type {
            MsgType::Mn => {
                if self.recent_uuids.contains(&header.ext.session_id) {
                    return (None, None); // duplicate suppression
                }
                self.recent_uuids.push(header.ext.session_id);
                if self.recent_uuids.len() > 64 {
                    self.recent_uuids.remove(0);
                }
                let dest_uri = uri_string(&header.ext.dest_uri);
                if self.listeners.lookup(header.prefix.com_id, src_ip, dest_ip, &dest_uri, transport).is_none() {
                    return (None, None);
                }
                (None, Some(MdEvent::Request { uuid: header.ext.session_id, com_id: header.prefix.com_id, payload }))
            }
            MsgType::Mr => {
                let dest_uri = uri_string(&header.ext.dest_uri);
                let listener = self.listeners.lookup(header.prefix.com_id, src_ip, dest_ip, &dest_uri, transport);
                if listener.is_none() {
                    let me_header = self.build_header(MsgType::Me, header.prefix.com_id, header.ext.session_id, Duration::ZERO, "", "", 0);
                    return (
                        Some(MdOutgoing { dest_ip: src_ip, transport, bytes: self.frame(&me_header, &[]) }),
                        Some(MdEvent::Final { uuid: header.ext.session_id, result: MdResult::NoListener }),
                    );
                }
                let session = MdSession {
                    uuid: header.ext.session_id,
                    role: MdRole::Responder,
                    state: MdState::ReqRecvd,
                    com_id: header.prefix.com_id,
                    peer_ip: src_ip,
                    transport,
                    reply_timeout: Duration::from_micros(header.ext.reply_timeout as u64),
                    confirm_timeout: self.config.confirm_timeout,
                    created: now,
                    last_activity: now,
                    num_expected_replies: 0,
                    num_replies: 0,
                    num_replies_query: 0,
                    num_confirm_sent: 0,
                    num_confirm_timeout: 0,
                    num_retries: 0,
                    num_retries_max: 0,
                    pending_frame: Vec::new(),
                };
                if self.sessions.insert(session).is_err() {
                    return (None, None);
                }
                (None, Some(MdEvent::Request { uuid: header.ext.session_id, com_id: header.prefix.com_id, payload }))
            }
            MsgType::Mp => {
                let uuid = header.ext.session_id;
                if let Some(session) = self.sessions.get_mut(&uuid) {
                    session.num_replies += 1;
                    session.state = MdState::Done;
                }
                self.sessions.remove_if_terminal(&uuid);
                (None, Some(MdEvent::Reply { uuid, payload }))
            }
            MsgType::Mq => {
                let uuid = header.ext.session_id;
                if let Some(session) = self.sessions.get_mut(&uuid) {
                    session.num_replies_query += 1;
                    session.state = MdState::AwaitConfirmSend;
                    session.last_activity = now;
                }
                (None, Some(MdEvent::ReplyQuery { uuid, payload }))
            }
            MsgType::Mc => {
                let uuid = header.ext.session_id;
                if let Some(session) = self.sessions.get_mut(&uuid) {
                    session.state = MdState::Done;
                }
                self.sessions.remove_if_terminal(&uuid);
                (None, Some(MdEvent::Confirmed { uuid }))
            }
            MsgType::Me => {
                let uuid = header.ext.session_id;
                self.sessions.force_remove(&uuid);
                (None, Some(MdEvent::Final { uuid, result: MdResult::NoListener }))
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions_bound_to(&self, peer_ip: Ipv4Addr) -> Vec<Uuid> {
        self.sessions.uuids_bound_to(peer_ip)
    }

    /// Every open MD session's UUID, regardless of peer (spec §4.1 `close`).
    pub fn open_session_uuids(&self) -> Vec<Uuid> {
        self.sessions_iter().map(|s| s.uuid).collect()
    }
}
