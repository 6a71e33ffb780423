//! Errors raised by the header codec and marshaller.
//!
//! One flat enum per crate, the same pattern `flux::shared::NetworkError` and
//! `t51core::net::error::Error` use: hand-rolled, `From<io::Error>` at the
//! boundary, no `std::error` derive crate.

use std::fmt;
use std::io;

#[derive(Debug, Eq, PartialEq)]
pub enum WireError {
    /// Fewer bytes were available than the header or payload declared.
    Truncated,
    /// Header or body CRC did not match the computed value.
    CrcMismatch,
    /// Declared payload length did not match `datasetLength` in the header.
    LengthMismatch,
    /// Nested dataset recursion exceeded the design bound (16).
    DepthExceeded,
    /// `lookup(datasetId)` found nothing in the registry.
    UnknownDataset(u32),
    /// Protocol version's major component did not match.
    VersionMismatch,
    Io(io::ErrorKind),
}

impl From<io::Error> for WireError {
    #[inline]
    fn from(err: io::Error) -> Self {
        WireError::Io(err.kind())
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated => write!(f, "buffer truncated"),
            WireError::CrcMismatch => write!(f, "CRC mismatch"),
            WireError::LengthMismatch => write!(f, "declared length mismatch"),
            WireError::DepthExceeded => write!(f, "nested dataset depth exceeded"),
            WireError::UnknownDataset(id) => write!(f, "unknown dataset id {id}"),
            WireError::VersionMismatch => write!(f, "protocol version mismatch"),
            WireError::Io(kind) => write!(f, "io error: {kind:?}"),
        }
    }
}

impl std::error::Error for WireError {}

pub type WireResult<T> = Result<T, WireError>;
