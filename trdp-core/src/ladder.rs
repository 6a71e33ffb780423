//! Ladder topology convenience wrapper (spec §12.5), modeled on
//! `original_source/src/api/trdp_ladder_app.h`'s pairing of two sessions
//! bound to the two redundant subnets. Adds no invariant beyond what each
//! `Session` already guarantees; it only forwards calls to both.

use crate::config::SessionConfig;
use crate::error::TrdpResult;
use crate::pd::{PublisherId, SubscriberId, TimeoutPolicy};
use crate::session::Session;
use std::net::Ipv4Addr;
use std::time::Duration;
use trdp_wire::marshal::{DatasetDescriptor, DatasetRegistry, DatasetValue};

/// A matched pair of `Session`s on the two subnets of a redundant ladder.
pub struct LadderPair {
    pub primary: Session,
    pub secondary: Session,
}

impl LadderPair {
    pub fn open(
        primary_ip: Ipv4Addr,
        secondary_ip: Ipv4Addr,
        config: SessionConfig,
        registry_primary: Box<dyn DatasetRegistry + Send>,
        registry_secondary: Box<dyn DatasetRegistry + Send>,
        logger: Option<slog::Logger>,
    ) -> TrdpResult<LadderPair> {
        let primary = Session::open(primary_ip, config.clone(), registry_primary, logger.clone())?;
        let secondary = Session::open(secondary_ip, config, registry_secondary, logger)?;
        Ok(LadderPair { primary, secondary })
    }

    /// Publishes on both subnets; leadership (spec §4.2 "Redundancy")
    /// decides which one actually transmits at `process` time.
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &mut self,
        com_id: u32,
        dest_ip: Ipv4Addr,
        interval: Duration,
        red_id: u32,
        dataset: DatasetDescriptor,
        initial: &[DatasetValue],
    ) -> TrdpResult<(PublisherId, PublisherId)> {
        let a = self.primary.publish(com_id, dest_ip, interval, red_id, dataset.clone(), initial)?;
        let b = self.secondary.publish(com_id, dest_ip, interval, red_id, dataset, initial)?;
        Ok((a, b))
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
    ) -> TrdpResult<(SubscriberId, SubscriberId)> {
        let a = self.primary.subscribe(com_id, src_ip, dest_ip, timeout, policy, dataset.clone(), slot_size)?;
        let b = self.secondary.subscribe(com_id, src_ip, dest_ip, timeout, policy, dataset, slot_size)?;
        Ok((a, b))
    }

    /// Flips leadership on both sessions so exactly one subnet transmits.
    pub fn set_leader(&mut self, red_id: u32, primary_is_leader: bool) {
        self.primary.set_redundant(red_id, primary_is_leader);
        self.secondary.set_redundant(red_id, !primary_is_leader);
    }

    pub fn process_both(&mut self, budget: Option<Duration>) -> TrdpResult<()> {
        self.primary.process(budget)?;
        self.secondary.process(budget)?;
        Ok(())
    }
}
