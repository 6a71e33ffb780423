//! Session configuration (spec §4.1 `open()` parameters).
//!
//! Mirrors `flux`'s plain-struct-with-`Default` style for tunables rather
//! than a builder: the values are all independent knobs, not a multi-step
//! construction sequence.

use std::net::Ipv4Addr;
use std::time::Duration;

/// Size classes for the free-list arena backing the traffic store and
/// outgoing packet buffers (spec §4.1).
pub const MEM_SIZE_CLASSES: &[usize] = &[
    48, 72, 128, 180, 256, 512, 1024, 1480, 2048, 4096, 11520, 16384, 32768, 65536, 131072,
];

pub const PD_PORT: u16 = 17224;
pub const MD_PORT: u16 = 17225;

#[derive(Debug, Clone)]
pub struct MemConfig {
    pub size_classes: Vec<usize>,
    pub preallocate: usize,
}

impl Default for MemConfig {
    fn default() -> Self {
        MemConfig {
            size_classes: MEM_SIZE_CLASSES.to_vec(),
            preallocate: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PdConfig {
    pub port: u16,
    pub timeout: Duration,
    pub to_behavior_keep_last: bool,
}

impl Default for PdConfig {
    fn default() -> Self {
        PdConfig {
            port: PD_PORT,
            timeout: Duration::from_millis(300),
            to_behavior_keep_last: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MdConfig {
    pub udp_port: u16,
    pub tcp_port: u16,
    pub max_num_sessions: usize,
    pub reply_timeout: Duration,
    pub confirm_timeout: Duration,
}

impl Default for MdConfig {
    fn default() -> Self {
        MdConfig {
            udp_port: MD_PORT,
            tcp_port: MD_PORT,
            max_num_sessions: 20,
            reply_timeout: Duration::from_millis(1000),
            confirm_timeout: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub own_ip: Ipv4Addr,
    pub leader: bool,
    pub blocking: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            own_ip: Ipv4Addr::UNSPECIFIED,
            leader: true,
            blocking: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub mem: MemConfig,
    pub pd: PdConfig,
    pub md: MdConfig,
    pub process: ProcessConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.pd.port, 17224);
        assert_eq!(cfg.md.udp_port, 17225);
        assert_eq!(cfg.md.max_num_sessions, 20);
        assert_eq!(cfg.mem.size_classes, MEM_SIZE_CLASSES);
    }
}
