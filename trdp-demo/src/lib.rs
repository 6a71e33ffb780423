//! Shared CLI plumbing for the sample publisher/subscriber/caller/replier
//! binaries. Each binary owns one `Session` and drives it from a plain
//! `loop { session.process(...) }`, the same polling shape as
//! `server/util/src/bin/test_listen.rs`.

use clap::Parser;
use std::net::Ipv4Addr;
use trdp_core::config::SessionConfig;
use trdp_proc::Dataset;
use trdp_wire::marshal::{DatasetRegistry, Dataset as _};

/// A one-field counter dataset, standing in for a real rolling-stock
/// telegram in these demos (spec §8 S1 uses the same one-byte shape).
#[derive(Debug, Clone, Copy, PartialEq, Dataset)]
#[trdp(id = 1)]
pub struct Counter {
    pub value: u32,
}

/// The demo telegrams are flat and never reference each other, so lookups
/// always miss; a real application's registry would hold one descriptor
/// per dataset id used over the wire.
pub struct DemoRegistry;

impl DatasetRegistry for DemoRegistry {
    fn lookup(&self, _dataset_id: u32) -> Option<&trdp_wire::marshal::DatasetDescriptor> {
        None
    }
}

#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Local IP this session binds its PD/MD sockets to.
    #[arg(long, default_value = "127.0.0.1")]
    pub local_ip: Ipv4Addr,

    /// Peer IP to publish/notify/request towards.
    #[arg(long, default_value = "127.0.0.1")]
    pub dest_ip: Ipv4Addr,

    /// comId used for the demo telegram.
    #[arg(long, default_value_t = 1000)]
    pub com_id: u32,

    /// slog level: trace, debug, info, warning, error, critical.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Number of `process` iterations to run before exiting; 0 runs forever.
    #[arg(long, default_value_t = 0)]
    pub iterations: u64,
}

impl CommonArgs {
    pub fn logger(&self) -> slog::Logger {
        trdp_core::logging::terminal_logger(&self.log_level)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
    }
}

pub fn counter_descriptor() -> trdp_wire::marshal::DatasetDescriptor {
    Counter::descriptor()
}

pub fn counter_to_values(counter: &Counter) -> Vec<trdp_wire::marshal::DatasetValue> {
    counter.to_values()
}

pub fn counter_from_bytes(registry: &dyn DatasetRegistry, bytes: &[u8]) -> Option<Counter> {
    trdp_wire::marshal::unmarshal_dataset(registry, bytes).ok()
}

/// Calls `body` (one `Session::process` tick) until `iterations` have
/// elapsed, 0 meaning unbounded. `process`'s own `mio::Poll::poll` wait
/// paces the loop, so there is no sleep here.
pub fn run_loop<F>(iterations: u64, mut body: F)
where
    F: FnMut() -> trdp_core::TrdpResult<()>,
{
    let mut count = 0u64;
    loop {
        if let Err(e) = body() {
            eprintln!("demo loop error: {e}");
            break;
        }
        count += 1;
        if iterations != 0 && count >= iterations {
            break;
        }
    }
}
