//! Session Table (C6, spec §4.6) and the per-UUID MD state machine
//! (spec §4.4).

use crate::error::{TrdpError, TrdpResult};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

pub type Uuid = [u8; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdState {
    ReqSent,
    AwaitConfirmSend,
    ReqRecvd,
    AwaitConfirmRecv,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// One MD dialog (spec §3 "MD Session").
#[derive(Debug, Clone)]
pub struct MdSession {
    pub uuid: Uuid,
    pub role: MdRole,
    pub state: MdState,
    pub com_id: u32,
    pub peer_ip: Ipv4Addr,
    pub transport: Transport,
    pub reply_timeout: Duration,
    pub confirm_timeout: Duration,
    pub created: Instant,
    pub last_activity: Instant,
    pub num_expected_replies: u32,
    pub num_replies: u32,
    pub num_replies_query: u32,
    pub num_confirm_sent: u32,
    pub num_confirm_timeout: u32,
    pub num_retries: u32,
    pub num_retries_max: u32,
    /// Encoded Mr datagram, kept for UDP retransmission (spec §4.4 "UDP
    /// retransmission"); empty for responder-role sessions, which never
    /// retransmit.
    pub pending_frame: Vec<u8>,
}

impl MdSession {
    pub fn is_terminal(&self) -> bool {
        self.state == MdState::Done
    }
}

pub struct SessionTable {
    sessions: HashMap<Uuid, MdSession>,
    max_num_sessions: usize,
}

impl SessionTable {
    pub fn new(max_num_sessions: usize) -> Self {
        SessionTable { sessions: HashMap::new(), max_num_sessions }
    }

    /// spec §4.6: "further requests fail with MEM_ERR" once full.
    pub fn insert(&mut self, session: MdSession) -> TrdpResult<()> {
        if self.sessions.len() >= self.max_num_sessions {
            return Err(TrdpError::MemErr);
        }
        self.sessions.insert(session.uuid, session);
        Ok(())
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&MdSession> {
        self.sessions.get(uuid)
    }

    pub fn get_mut(&mut self, uuid: &Uuid) -> Option<&mut MdSession> {
        self.sessions.get_mut(uuid)
    }

    /// spec I2: "on terminal state it is freed exactly once."
    pub fn remove_if_terminal(&mut self, uuid: &Uuid) -> Option<MdSession> {
        if self.sessions.get(uuid).is_some_and(MdSession::is_terminal) {
            self.sessions.remove(uuid)
        } else {
            None
        }
    }

    pub fn force_remove(&mut self, uuid: &Uuid) -> Option<MdSession> {
        self.sessions.remove(uuid)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MdSession> {
        self.sessions.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MdSession> {
        self.sessions.values()
    }

    pub fn uuids_bound_to(&self, peer_ip: Ipv4Addr) -> Vec<Uuid> {
        self.sessions
            .values()
            .filter(|s| s.peer_ip == peer_ip)
            .map(|s| s.uuid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(uuid: Uuid) -> MdSession {
        let now = Instant::now();
        MdSession {
            uuid,
            role: MdRole::Initiator,
            state: MdState::ReqSent,
            com_id: 1,
            peer_ip: Ipv4Addr::UNSPECIFIED,
            transport: Transport::Udp,
            reply_timeout: Duration::from_secs(1),
            confirm_timeout: Duration::from_secs(1),
            created: now,
            last_activity: now,
            num_expected_replies: 1,
            num_replies: 0,
            num_replies_query: 0,
            num_confirm_sent: 0,
            num_confirm_timeout: 0,
            num_retries: 0,
            num_retries_max: 3,
            pending_frame: Vec::new(),
        }
    }

    #[test]
    fn table_rejects_beyond_max_sessions() {
        let mut table = SessionTable::new(1);
        table.insert(sample([1; 16])).unwrap();
        assert_eq!(table.insert(sample([2; 16])), Err(TrdpError::MemErr));
    }

    #[test]
    fn terminal_session_is_removed_exactly_once() {
        let mut table = SessionTable::new(10);
        let uuid = [1; 16];
        table.insert(sample(uuid)).unwrap();
        assert!(table.remove_if_terminal(&uuid).is_none());
        table.get_mut(&uuid).unwrap().state = MdState::Done;
        assert!(table.remove_if_terminal(&uuid).is_some());
        assert!(table.get(&uuid).is_none());
    }
}
