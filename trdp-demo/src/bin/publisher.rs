//! Cyclically publishes an incrementing `Counter` (spec §4.2 "Sending").
use clap::Parser;
use std::time::Duration;
use trdp_demo::{counter_descriptor, counter_to_values, CommonArgs, Counter, DemoRegistry};

#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Cyclic send interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
}

fn main() -> trdp_core::TrdpResult<()> {
    let args = Args::parse();
    let logger = args.common.logger();
    let mut session = trdp_core::Session::open(
        args.common.local_ip,
        args.common.session_config(),
        Box::new(DemoRegistry),
        Some(logger.clone()),
    )?;

    let publisher = session.publish(
        args.common.com_id,
        args.common.dest_ip,
        Duration::from_millis(args.interval_ms),
        0,
        counter_descriptor(),
        &counter_to_values(&Counter { value: 0 }),
    )?;

    slog::info!(logger, "publishing"; "com_id" => args.common.com_id, "dest_ip" => %args.common.dest_ip);

    let mut value = 0u32;
    trdp_demo::run_loop(args.common.iterations, || {
        value = value.wrapping_add(1);
        session.write_published(publisher, &counter_to_values(&Counter { value }))?;
        let events = session.process(Some(Duration::from_millis(args.interval_ms)))?;
        for event in events {
            slog::debug!(logger, "session event"; "event" => ?event);
        }
        Ok(())
    });

    session.close()
}
