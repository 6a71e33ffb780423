//! Telegram table loader (spec §6 "Configuration"): the core consumes an
//! in-memory table of `{ appSession, comId, direction, source, destination,
//! dataset, timing }` tuples produced by an external XML/LADDER tool. This
//! crate stands in for that external tool's *output shape* only — it loads
//! the same table from TOML via `serdeconv`, the way `flux::logging::init`
//! loads a `LoggerConfig` from an inline TOML string.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use trdp_core::error::{TrdpError, TrdpResult};
use trdp_wire::marshal::DatasetDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Publisher,
    Subscriber,
    Caller,
    Replier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramEntry {
    pub app_session: String,
    pub com_id: u32,
    pub direction: Direction,
    /// Expected source IP for a subscriber, `None` meaning "any" (spec §3
    /// "Endpoint address").
    pub source: Option<Ipv4Addr>,
    pub destination: Ipv4Addr,
    pub dataset: DatasetDescriptor,
    /// Cyclic interval for a publisher, timeout for a subscriber/caller, in
    /// milliseconds.
    pub timing_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramTable {
    pub telegrams: Vec<TelegramEntry>,
}

impl TelegramTable {
    pub fn from_toml_str(s: &str) -> TrdpResult<TelegramTable> {
        serdeconv::from_toml_str(s).map_err(|_| TrdpError::ParamErr)
    }

    pub fn from_toml_file(path: &Path) -> TrdpResult<TelegramTable> {
        serdeconv::from_toml_file(path).map_err(|_| TrdpError::ParamErr)
    }

    pub fn entries_for<'a>(&'a self, app_session: &'a str) -> impl Iterator<Item = &'a TelegramEntry> {
        self.telegrams.iter().filter(move |e| e.app_session == app_session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trdp_wire::marshal::{ElementDescriptor, ElementType};

    #[test]
    fn loads_a_publisher_and_subscriber_entry() {
        let toml = r#"
[[telegrams]]
app_session = "door-control"
com_id = 1000
direction = "publisher"
destination = "239.1.1.1"
timing_ms = 100

[telegrams.dataset]
dataset_id = 1
elements = [{ element_type = "Bool8", count = 1 }]

[[telegrams]]
app_session = "door-control"
com_id = 1000
direction = "subscriber"
destination = "239.1.1.1"
timing_ms = 500

[telegrams.dataset]
dataset_id = 1
elements = [{ element_type = "Bool8", count = 1 }]
"#;
        let table = TelegramTable::from_toml_str(toml).unwrap();
        assert_eq!(table.telegrams.len(), 2);
        let publisher = &table.telegrams[0];
        assert_eq!(publisher.com_id, 1000);
        assert_eq!(publisher.direction, Direction::Publisher);
        assert_eq!(
            publisher.dataset,
            DatasetDescriptor {
                dataset_id: 1,
                elements: vec![ElementDescriptor { element_type: ElementType::Bool8, count: 1 }],
            }
        );
        assert_eq!(table.entries_for("door-control").count(), 2);
        assert_eq!(table.entries_for("no-such-session").count(), 0);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert_eq!(TelegramTable::from_toml_str("not valid = [").unwrap_err(), TrdpError::ParamErr);
    }
}
