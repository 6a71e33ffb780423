//! Listener Table (C5, spec §4.5): demultiplexes incoming Mn/Mr datagrams
//! to a registered callback reference by `(comId, srcIP, destIP, destURI)`.

use crate::error::{TrdpError, TrdpResult};
use crate::md::session_table::Transport;
use std::net::Ipv4Addr;

pub type ListenerId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerFlags {
    pub udp: bool,
    pub tcp: bool,
}

impl Default for ListenerFlags {
    fn default() -> Self {
        ListenerFlags { udp: true, tcp: true }
    }
}

struct Entry {
    com_id: u32,
    src_ip: Option<Ipv4Addr>,
    dest_ip: Option<Ipv4Addr>,
    dest_uri: String,
    user_ref: u64,
    flags: ListenerFlags,
    live: bool,
}

#[derive(Default)]
pub struct ListenerTable {
    entries: Vec<Entry>,
}

impl ListenerTable {
    pub fn new() -> Self {
        ListenerTable { entries: Vec::new() }
    }

    /// Spec §4.5: "Insertion rejects a duplicate key with PARAM_ERR."
    pub fn add(
        &mut self,
        com_id: u32,
        src_ip: Option<Ipv4Addr>,
        dest_ip: Option<Ipv4Addr>,
        dest_uri: String,
        user_ref: u64,
        flags: ListenerFlags,
    ) -> TrdpResult<ListenerId> {
        if self.entries.iter().any(|e| {
            e.live
                && e.com_id == com_id
                && e.src_ip == src_ip
                && e.dest_ip == dest_ip
                && e.dest_uri == dest_uri
        }) {
            return Err(TrdpError::ParamErr);
        }

        let entry = Entry { com_id, src_ip, dest_ip, dest_uri, user_ref, flags, live: true };
        if let Some(idx) = self.entries.iter().position(|e| !e.live) {
            self.entries[idx] = entry;
            Ok(idx)
        } else {
            self.entries.push(entry);
            Ok(self.entries.len() - 1)
        }
    }

    pub fn remove(&mut self, id: ListenerId) -> TrdpResult<()> {
        let entry = self.entries.get_mut(id).ok_or(TrdpError::ParamErr)?;
        if !entry.live {
            return Err(TrdpError::ParamErr);
        }
        entry.live = false;
        Ok(())
    }

    /// First entry (in insertion order) whose filters all match; zero
    /// (`None`/empty string) filters are wildcards. `transport` is matched
    /// against the listener's UDP/TCP flags (spec §4.5 "flags").
    pub fn lookup(
        &self,
        com_id: u32,
        src_ip: Ipv4Addr,
        dest_ip: Ipv4Addr,
        dest_uri: &str,
        transport: Transport,
    ) -> Option<(ListenerId, u64)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| {
                e.live
                    && e.com_id == com_id
                    && e.src_ip.is_none_or(|ip| ip == src_ip)
                    && e.dest_ip.is_none_or(|ip| ip == dest_ip)
                    && (e.dest_uri.is_empty() || e.dest_uri == dest_uri)
                    && match transport {
                        Transport::Udp => e.flags.udp,
                        Transport::Tcp => e.flags.tcp,
                    }
            })
            .map(|(idx, e)| (idx, e.user_ref))
    }
}
