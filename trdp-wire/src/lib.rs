//! Wire-level building blocks for TRDP: the 112/40/116-byte fixed headers
//! with their CRC32 trailer, and the recursive dataset marshaller.
//!
//! This crate has no notion of sockets, sessions, or scheduling — it is pure
//! encode/decode, grounded on `flux::shared`'s pattern of private inherent
//! `write`/`read` methods over a `Cursor`. It does not use that module's
//! `Serialize`/`Deserialize` and `SizedWrite`/`SizedRead` traits: every wire
//! type here has exactly one encoding, so a trait-based contract for
//! swappable codecs would be unused generality.

pub mod crc;
pub mod error;
pub mod header;
pub mod marshal;

pub use error::{WireError, WireResult};
