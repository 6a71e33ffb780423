pub mod config;
pub mod error;
pub mod ladder;
pub mod logging;
pub mod md;
pub mod pd;
pub mod session;

pub use error::{TrdpError, TrdpResult};
pub use session::{Session, SessionEvent};

pub use trdp_wire as wire;
