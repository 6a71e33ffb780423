//! One core-level error enum (spec §7, Design Notes item 7: "Present one
//! core-level error enum ... map to application-level codes only at the
//! boundary"), following the hand-rolled `From<io::Error>` pattern used
//! throughout the teacher repository's networking errors.

use std::fmt;
use std::io;
use trdp_wire::WireError;

#[derive(Debug, Eq, PartialEq)]
pub enum TrdpError {
    ParamErr,
    InitErr,
    MemErr,
    SockErr,
    IoErr,
    TimeoutErr,
    ReplyToErr,
    ConfirmToErr,
    ReqConfirmToErr,
    ComIdErr,
    CrcErr,
    NoListener,
}

impl From<io::Error> for TrdpError {
    #[inline]
    fn from(_: io::Error) -> Self {
        TrdpError::IoErr
    }
}

impl From<WireError> for TrdpError {
    #[inline]
    fn from(err: WireError) -> Self {
        match err {
            WireError::CrcMismatch => TrdpError::CrcErr,
            WireError::UnknownDataset(_) => TrdpError::ComIdErr,
            _ => TrdpError::ParamErr,
        }
    }
}

impl fmt::Display for TrdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TrdpError::ParamErr => "invalid argument",
            TrdpError::InitErr => "session not open or already open",
            TrdpError::MemErr => "arena or session table exhausted",
            TrdpError::SockErr => "socket operation rejected by the OS",
            TrdpError::IoErr => "send/receive failed",
            TrdpError::TimeoutErr => "generic timeout",
            TrdpError::ReplyToErr => "MD reply timeout",
            TrdpError::ConfirmToErr => "Mq to Mc confirmation timeout",
            TrdpError::ReqConfirmToErr => "responder waited for Mc",
            TrdpError::ComIdErr => "unknown comId on receive",
            TrdpError::CrcErr => "header or body CRC mismatch",
            TrdpError::NoListener => "Mr with no matching listener",
        };
        f.write_str(text)
    }
}

impl std::error::Error for TrdpError {}

pub type TrdpResult<T> = Result<T, TrdpError>;
