//! PD Engine (C2, spec §4.2): scheduled cyclic senders, matched receivers,
//! timeout policy application, redundancy groups and the pull pattern.

pub mod store;

use crate::config::PdConfig;
use crate::error::{TrdpError, TrdpResult};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use store::{Slot, TrafficStore};
use trdp_wire::header::{CommonPrefix, PdExtension, PdHeader, PROTOCOL_VERSION};
use trdp_wire::marshal::{self, DatasetDescriptor, DatasetRegistry, DatasetValue};

pub type PublisherId = usize;
pub type SubscriberId = usize;

/// Maximum PD payload, fitting a typical Ethernet MTU (spec §8 B2).
pub const MAX_PD_PAYLOAD: usize = 1436;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    KeepLast,
    Zero,
    Invalid,
}

struct Publisher {
    com_id: u32,
    dest_ip: Ipv4Addr,
    interval: Duration,
    red_id: u32,
    dataset: DatasetDescriptor,
    slot: Slot,
    next_deadline: Instant,
    sequence_counter: u32,
    fail_count: u32,
    live: bool,
}

struct Subscriber {
    com_id: u32,
    src_ip: Option<Ipv4Addr>,
    dest_ip: Ipv4Addr,
    timeout: Duration,
    policy: TimeoutPolicy,
    dataset: DatasetDescriptor,
    slot: Slot,
    last_seen: Instant,
    timed_out: bool,
    live: bool,
    /// `datasetLength` from the most recently received PD datagram's
    /// header; the traffic store's slot is fixed-size and zero-padded, so
    /// this is what `unmarshal` must be told to bound its read to.
    received_len: usize,
}

/// A datagram the caller must hand to the session's UDP PD socket.
pub struct PdOutgoing {
    pub dest_ip: Ipv4Addr,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdEvent {
    Updated(SubscriberId),
    TimedOut(SubscriberId),
    PullFired(PublisherId),
}

pub struct PdEngine {
    config: PdConfig,
    publishers: Vec<Publisher>,
    subscribers: Vec<Subscriber>,
    redundant_leader: HashMap<u32, bool>,
    etb_topo_count: u32,
    op_trn_topo_count: u32,
}

impl PdEngine {
    pub fn new(config: PdConfig) -> Self {
        PdEngine {
            config,
            publishers: Vec::new(),
            subscribers: Vec::new(),
            redundant_leader: HashMap::new(),
            etb_topo_count: 0,
            op_trn_topo_count: 0,
        }
    }

    pub fn set_redundant(&mut self, red_id: u32, leader: bool) {
        self.redundant_leader.insert(red_id, leader);
    }

    pub fn config(&self) -> &PdConfig {
        &self.config
    }

    fn is_leader(&self, red_id: u32) -> bool {
        Self::leader_of(&self.redundant_leader, red_id)
    }

    fn leader_of(redundant_leader: &HashMap<u32, bool>, red_id: u32) -> bool {
        red_id == 0 || *redundant_leader.get(&red_id).unwrap_or(&true)
    }

    /// Registers a cyclic publisher (spec §4.2 "Sending"). `interval ==
    /// Duration::ZERO` means pull-only (spec: "never fires cyclically").
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &mut self,
        store: &mut TrafficStore,
        registry: &dyn DatasetRegistry,
        com_id: u32,
        dest_ip: Ipv4Addr,
        interval: Duration,
        red_id: u32,
        dataset: DatasetDescriptor,
        initial: &[DatasetValue],
        now: Instant,
    ) -> TrdpResult<PublisherId> {
        if self
            .publishers
            .iter()
            .any(|p| p.live && p.com_id == com_id && p.dest_ip == dest_ip)
        {
            return Err(TrdpError::ParamErr); // I1
        }

        let bytes = marshal::marshal(registry, &dataset, initial).map_err(TrdpError::from)?;
        if bytes.len() > MAX_PD_PAYLOAD {
            return Err(TrdpError::ParamErr); // B2
        }

        let slot = store.allocate(bytes.len());
        store.copy_in(slot, &bytes);

        let publisher = Publisher {
            com_id,
            dest_ip,
            interval,
            red_id,
            dataset,
            slot,
            next_deadline: if interval.is_zero() {
                now
            } else {
                now + interval
            },
            sequence_counter: 0,
            fail_count: 0,
            live: true,
        };

        if let Some(slot_idx) = self.publishers.iter().position(|p| !p.live) {
            self.publishers[slot_idx] = publisher;
            Ok(slot_idx)
        } else {
            self.publishers.push(publisher);
            Ok(self.publishers.len() - 1)
        }
    }

    /// Re-marshals new values into a live publisher's Traffic Store slice
    /// (spec §4.2 "Sending" transmits whatever is currently in the slot,
    /// so updates land there between cyclic sends without a republish).
    pub fn write(
        &mut self,
        store: &mut TrafficStore,
        registry: &dyn DatasetRegistry,
        id: PublisherId,
        values: &[DatasetValue],
    ) -> TrdpResult<()> {
        let publisher = self.publishers.get_mut(id).ok_or(TrdpError::ParamErr)?;
        if !publisher.live {
            return Err(TrdpError::ParamErr);
        }
        let bytes = marshal::marshal(registry, &publisher.dataset, values).map_err(TrdpError::from)?;
        if bytes.len() > publisher.slot.size {
            publisher.fail_count += 1;
            return Err(TrdpError::ParamErr); // B2
        }
        store.copy_in(publisher.slot, &bytes);
        Ok(())
    }

    /// R1: afterward, `publish` with the same `(comId, destIp)` succeeds again.
    pub fn unpublish(&mut self, store: &mut TrafficStore, id: PublisherId) -> TrdpResult<()> {
        let publisher = self.publishers.get_mut(id).ok_or(TrdpError::ParamErr)?;
        if !publisher.live {
            return Err(TrdpError::ParamErr);
        }
        store.release(publisher.slot);
        publisher.live = false;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        &mut self,
        store: &mut TrafficStore,
        com_id: u32,
        src_ip: Option<Ipv4Addr>,
        dest_ip: Ipv4Addr,
        timeout: Duration,
        policy: TimeoutPolicy,
        dataset: DatasetDescriptor,
        slot_size: usize,
        now: Instant,
    ) -> TrdpResult<SubscriberId> {
        if self.subscribers.iter().any(|s| {
            s.live && s.com_id == com_id && s.src_ip == src_ip && s.dest_ip == dest_ip
        }) {
            return Err(TrdpError::ParamErr); // I1
        }

        let slot = store.allocate(slot_size);
        let subscriber = Subscriber {
            com_id,
            src_ip,
            dest_ip,
            timeout,
            policy,
            dataset,
            slot,
            last_seen: now,
            timed_out: false,
            live: true,
            received_len: 0,
        };

        if let Some(slot_idx) = self.subscribers.iter().position(|s| !s.live) {
            self.subscribers[slot_idx] = subscriber;
            Ok(slot_idx)
        } else {
            self.subscribers.push(subscriber);
            Ok(self.subscribers.len() - 1)
        }
    }

    pub fn unsubscribe(&mut self, store: &mut TrafficStore, id: SubscriberId) -> TrdpResult<()> {
        let subscriber = self.subscribers.get_mut(id).ok_or(TrdpError::ParamErr)?;
        if !subscriber.live {
            return Err(TrdpError::ParamErr);
        }
        store.release(subscriber.slot);
        subscriber.live = false;
        Ok(())
    }

    pub fn read<'a>(&self, store: &'a TrafficStore, id: SubscriberId) -> &'a [u8] {
        store.copy_out(self.subscribers[id].slot)
    }

    /// Unmarshals a subscriber's current Traffic Store slice using the
    /// dataset layout it was subscribed with (spec §4.7 marshal/unmarshal
    /// are the same layout in both directions).
    pub fn read_typed(
        &self,
        store: &TrafficStore,
        registry: &dyn DatasetRegistry,
        id: SubscriberId,
    ) -> TrdpResult<Vec<DatasetValue>> {
        let subscriber = self.subscribers.get(id).ok_or(TrdpError::ParamErr)?;
        let bytes = store.copy_out(subscriber.slot);
        marshal::unmarshal(registry, &subscriber.dataset, bytes, subscriber.received_len).map_err(TrdpError::from)
    }

    /// Earliest deadline across cyclic publishers and subscriber timeouts.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        let mut earliest: Option<Instant> = None;
        for p in self.publishers.iter().filter(|p| p.live && !p.interval.is_zero()) {
            earliest = Some(earliest.map_or(p.next_deadline, |e| e.min(p.next_deadline)));
        }
        for s in self.subscribers.iter().filter(|s| s.live && !s.timed_out) {
            let deadline = s.last_seen + s.timeout;
            earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
        }
        earliest.map(|d| d.saturating_duration_since(now))
    }

    fn build_datagram(etb_topo_count: u32, op_trn_topo_count: u32, publisher: &Publisher, payload: &[u8]) -> Vec<u8> {
        let mut body = payload.to_vec();
        trdp_wire::header::append_body_crc(&mut body);

        let header = PdHeader {
            prefix: CommonPrefix {
                sequence_counter: publisher.sequence_counter,
                protocol_version: PROTOCOL_VERSION,
                msg_type: *b"Pd",
                com_id: publisher.com_id,
                etb_topo_count,
                op_trn_topo_count,
                dataset_length: payload.len() as u32,
            },
            ext: PdExtension::default(),
        };

        let mut datagram = header.encode();
        datagram.extend_from_slice(&body);
        datagram
    }

    /// Advances scheduled sends and subscriber timeouts; spec §4.2
    /// "Sending" and "Timeout".
    pub fn tick(
        &mut self,
        store: &mut TrafficStore,
        now: Instant,
        events: &mut Vec<PdEvent>,
    ) -> Vec<PdOutgoing> {
        let mut outgoing = Vec::new();
        let etb_topo_count = self.etb_topo_count;
        let op_trn_topo_count = self.op_trn_topo_count;
        let redundant_leader = &self.redundant_leader;

        for publisher in self.publishers.iter_mut() {
            if !publisher.live || publisher.interval.is_zero() {
                continue;
            }
            if publisher.next_deadline > now {
                continue;
            }
            publisher.next_deadline += publisher.interval;
            if !Self::leader_of(redundant_leader, publisher.red_id) {
                continue; // redundancy follower: timer fires, transmission suppressed
            }
            let payload = store.copy_out(publisher.slot).to_vec();
            let datagram = Self::build_datagram(etb_topo_count, op_trn_topo_count, publisher, &payload);
            publisher.sequence_counter = publisher.sequence_counter.wrapping_add(1);
            outgoing.push(PdOutgoing { dest_ip: publisher.dest_ip, bytes: datagram });
        }

        for (idx, subscriber) in self.subscribers.iter_mut().enumerate() {
            if !subscriber.live || subscriber.timed_out {
                continue;
            }
            if now.duration_since(subscriber.last_seen) <= subscriber.timeout {
                continue;
            }
            match subscriber.policy {
                TimeoutPolicy::KeepLast => {}
                TimeoutPolicy::Zero => store.zero(subscriber.slot),
                TimeoutPolicy::Invalid => store.mark_invalid(subscriber.slot),
            }
            subscriber.timed_out = true;
            events.push(PdEvent::TimedOut(idx));
        }

        outgoing
    }

    /// Forces the publisher for `reply_com_id` to send its next datagram
    /// immediately, used by the pull pattern (spec §4.2 "Pull").
    pub fn force_fire(
        &mut self,
        store: &mut TrafficStore,
        reply_com_id: u32,
    ) -> Option<PdOutgoing> {
        let idx = self
            .publishers
            .iter()
            .position(|p| p.live && p.com_id == reply_com_id)?;
        let etb_topo_count = self.etb_topo_count;
        let op_trn_topo_count = self.op_trn_topo_count;
        if !self.is_leader(self.publishers[idx].red_id) {
            return None;
        }
        let publisher = &mut self.publishers[idx];
        let payload = store.copy_out(publisher.slot).to_vec();
        let datagram = Self::build_datagram(etb_topo_count, op_trn_topo_count, publisher, &payload);
        publisher.sequence_counter = publisher.sequence_counter.wrapping_add(1);
        Some(PdOutgoing { dest_ip: publisher.dest_ip, bytes: datagram })
    }

    /// Sends a pull request (`msgType = "Pr"`, spec §4.2 "Pull").
    pub fn request_pull(&self, com_id: u32, reply_com_id: u32, dest_ip: Ipv4Addr) -> PdOutgoing {
        let header = PdHeader {
            prefix: CommonPrefix {
                sequence_counter: 0,
                protocol_version: PROTOCOL_VERSION,
                msg_type: *b"Pr",
                com_id,
                etb_topo_count: self.etb_topo_count,
                op_trn_topo_count: self.op_trn_topo_count,
                dataset_length: 0,
            },
            ext: PdExtension {
                reserved: 0,
                reply_com_id,
                reply_ip_addr: Ipv4Addr::UNSPECIFIED,
            },
        };
        PdOutgoing { dest_ip, bytes: header.encode() }
    }

    /// Demultiplexes a received PD datagram (spec §4.2 "Receiving"). Bad
    /// CRC or unknown comId datagrams are silently dropped per spec §4.2
    /// "Failure semantics" (caller should log at debug level).
    pub fn receive(
        &mut self,
        store: &mut TrafficStore,
        bytes: &[u8],
        src_ip: Ipv4Addr,
        dest_ip: Ipv4Addr,
        now: Instant,
    ) -> (Option<PdOutgoing>, Option<PdEvent>) {
        if bytes.len() < PdHeader::SIZE {
            return (None, None);
        }
        let header = match PdHeader::decode(&bytes[..PdHeader::SIZE]) {
            Ok(h) => h,
            Err(_) => return (None, None),
        };
        let payload = match trdp_wire::header::split_body_crc(&bytes[PdHeader::SIZE..]) {
            Ok(p) => p,
            Err(_) => return (None, None),
        };

        if header.prefix.msg_type == *b"Pr" {
            let reply_com_id = header.ext.reply_com_id;
            let outgoing = self.force_fire(store, reply_com_id);
            let event = self
                .publishers
                .iter()
                .position(|p| p.live && p.com_id == reply_com_id)
                .map(PdEvent::PullFired);
            return (outgoing, event);
        }

        let idx = match self.subscribers.iter().position(|s| {
            s.live
                && s.com_id == header.prefix.com_id
                && (s.src_ip.is_none() || s.src_ip == Some(src_ip))
                && s.dest_ip == dest_ip
        }) {
            Some(idx) => idx,
            None => return (None, None),
        };

        let subscriber = &mut self.subscribers[idx];
        store.copy_in(subscriber.slot, payload);
        subscriber.last_seen = now;
        subscriber.timed_out = false;
        subscriber.received_len = payload.len();
        (None, Some(PdEvent::Updated(idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trdp_wire::marshal::{ElementDescriptor, ElementType, EmptyRegistry};

    fn scalar_u8_dataset() -> DatasetDescriptor {
        DatasetDescriptor {
            dataset_id: 1,
            elements: vec![ElementDescriptor { element_type: ElementType::UInt8, count: 1 }],
        }
    }

    #[test]
    fn publish_then_subscribe_round_trip() {
        let mut store = TrafficStore::new();
        let registry = EmptyRegistry;
        let mut engine = PdEngine::new(PdConfig::default());
        let now = Instant::now();

        let publisher = engine
            .publish(
                &mut store,
                &registry,
                1000,
                "10.0.0.2".parse().unwrap(),
                Duration::from_millis(100),
                0,
                scalar_u8_dataset(),
                &[DatasetValue::UInt8(0x42)],
                now,
            )
            .unwrap();

        let mut events = Vec::new();
        let outgoing = engine.tick(&mut store, now + Duration::from_millis(100), &mut events);
        assert_eq!(outgoing.len(), 1);
        let _ = publisher;

        let sub = engine
            .subscribe(
                &mut store,
                1000,
                None,
                "10.0.0.2".parse().unwrap(),
                Duration::from_millis(300),
                TimeoutPolicy::KeepLast,
                scalar_u8_dataset(),
                1,
                now,
            )
            .unwrap();

        let (reply, event) = engine.receive(
            &mut store,
            &outgoing[0].bytes,
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            now + Duration::from_millis(100),
        );
        assert!(reply.is_none());
        assert_eq!(event, Some(PdEvent::Updated(sub)));
        assert_eq!(engine.read(&store, sub), &[0x42]);
    }

    #[test]
    fn write_updates_slice_transmitted_on_next_tick() {
        let mut store = TrafficStore::new();
        let registry = EmptyRegistry;
        let mut engine = PdEngine::new(PdConfig::default());
        let now = Instant::now();

        let publisher = engine
            .publish(
                &mut store,
                &registry,
                1001,
                "10.0.0.2".parse().unwrap(),
                Duration::from_millis(100),
                0,
                scalar_u8_dataset(),
                &[DatasetValue::UInt8(0x01)],
                now,
            )
            .unwrap();

        engine.write(&mut store, &registry, publisher, &[DatasetValue::UInt8(0x99)]).unwrap();

        let mut events = Vec::new();
        let outgoing = engine.tick(&mut store, now + Duration::from_millis(100), &mut events);
        assert_eq!(outgoing.len(), 1);
        let body = &outgoing[0].bytes[trdp_wire::header::PdHeader::SIZE..][..1];
        assert_eq!(body, &[0x99]);
    }

    #[test]
    fn subscriber_timeout_fires_after_window() {
        let mut store = TrafficStore::new();
        let mut engine = PdEngine::new(PdConfig::default());
        let now = Instant::now();
        let sub = engine
            .subscribe(
                &mut store,
                1000,
                None,
                "10.0.0.2".parse().unwrap(),
                Duration::from_millis(300),
                TimeoutPolicy::Zero,
                scalar_u8_dataset(),
                1,
                now,
            )
            .unwrap();
        store.copy_in(Slot { offset: 0, size: 1 }, &[0x42]);

        let mut events = Vec::new();
        engine.tick(&mut store, now + Duration::from_millis(299), &mut events);
        assert!(events.is_empty());

        engine.tick(&mut store, now + Duration::from_millis(301), &mut events);
        assert_eq!(events, vec![PdEvent::TimedOut(sub)]);
        assert_eq!(engine.read(&store, sub), &[0]);
    }

    #[test]
    fn republish_after_unpublish_succeeds() {
        let mut store = TrafficStore::new();
        let registry = EmptyRegistry;
        let mut engine = PdEngine::new(PdConfig::default());
        let now = Instant::now();
        let dest = "10.0.0.2".parse().unwrap();

        let first = engine
            .publish(
                &mut store, &registry, 1000, dest, Duration::from_millis(100), 0,
                scalar_u8_dataset(), &[DatasetValue::UInt8(1)], now,
            )
            .unwrap();
        engine.unpublish(&mut store, first).unwrap();

        assert!(engine
            .publish(
                &mut store, &registry, 1000, dest, Duration::from_millis(100), 0,
                scalar_u8_dataset(), &[DatasetValue::UInt8(2)], now,
            )
            .is_ok());
    }

    #[test]
    fn redundant_follower_suppresses_transmission() {
        let mut store = TrafficStore::new();
        let registry = EmptyRegistry;
        let mut engine = PdEngine::new(PdConfig::default());
        let now = Instant::now();
        engine.set_redundant(5, false);

        engine
            .publish(
                &mut store, &registry, 1000, "10.0.0.2".parse().unwrap(),
                Duration::from_millis(100), 5, scalar_u8_dataset(),
                &[DatasetValue::UInt8(1)], now,
            )
            .unwrap();

        let mut events = Vec::new();
        let outgoing = engine.tick(&mut store, now + Duration::from_millis(100), &mut events);
        assert!(outgoing.is_empty());
    }

    #[test]
    fn pull_request_fires_publisher_and_returns_the_datagram() {
        let mut store = TrafficStore::new();
        let registry = EmptyRegistry;
        let mut engine = PdEngine::new(PdConfig::default());
        let now = Instant::now();

        engine
            .publish(
                &mut store, &registry, 4000, "10.0.0.2".parse().unwrap(),
                Duration::ZERO, 0, scalar_u8_dataset(), &[DatasetValue::UInt8(0x7A)], now,
            )
            .unwrap();

        let pull = engine.request_pull(4000, 4000, "10.0.0.1".parse().unwrap());
        let (reply, event) = engine.receive(&mut store, &pull.bytes, "10.0.0.2".parse().unwrap(), "10.0.0.1".parse().unwrap(), now);
        let reply = reply.expect("pull request should force an immediate send");
        assert_eq!(reply.dest_ip, "10.0.0.2".parse::<Ipv4Addr>().unwrap());
        assert!(matches!(event, Some(PdEvent::PullFired(_))));
    }
}
