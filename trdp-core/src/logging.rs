//! Logging setup for the demo binaries (spec §12.1). Library code never
//! forces a sink: every component takes a `slog::Logger`, defaulting to
//! `slog::Discard` when the caller passes none.

use sloggers::Build;

/// Builds a terminal logger from an inline TOML config, matching
/// `flux::logging::init`'s use of `serdeconv`/`sloggers`.
pub fn terminal_logger(level: &str) -> slog::Logger {
    use sloggers::types::Severity;
    use sloggers::terminal::{Destination, TerminalLoggerBuilder};
    use std::str::FromStr;

    let mut builder = TerminalLoggerBuilder::new();
    builder.destination(Destination::Stderr);
    builder.level(Severity::from_str(level).unwrap_or(Severity::Debug));
    builder.build().expect("terminal logger must build")
}

/// Loads a `sloggers` `LoggerConfig` from a TOML document, for
/// applications that want file-based logging configuration instead of
/// the inline `terminal_logger` default.
pub fn logger_from_toml(toml: &str) -> slog::Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(toml).expect("invalid logger config");
    config.build_logger().expect("logger config must build")
}
