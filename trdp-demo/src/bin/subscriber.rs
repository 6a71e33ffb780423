//! Subscribes to a `Counter` and logs every update (spec §4.2 "Receiving").
use clap::Parser;
use std::time::Duration;
use trdp_core::pd::TimeoutPolicy;
use trdp_demo::{counter_descriptor, counter_from_bytes, CommonArgs, DemoRegistry};

#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Subscriber timeout in milliseconds (spec §4.2 "Timeout").
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,
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

    let subscriber = session.subscribe(
        args.common.com_id,
        None,
        args.common.local_ip,
        Duration::from_millis(args.timeout_ms),
        TimeoutPolicy::KeepLast,
        counter_descriptor(),
        4,
    )?;

    slog::info!(logger, "subscribing"; "com_id" => args.common.com_id);

    trdp_demo::run_loop(args.common.iterations, || {
        let events = session.process(Some(Duration::from_millis(args.timeout_ms)))?;
        for event in events {
            if let trdp_core::SessionEvent::Pd(pd_event) = event {
                if matches!(pd_event, trdp_core::pd::PdEvent::Updated(id) if id == subscriber) {
                    if let Some(counter) = counter_from_bytes(&DemoRegistry, session.read_subscription(subscriber)) {
                        slog::info!(logger, "updated"; "value" => counter.value);
                    }
                } else if matches!(pd_event, trdp_core::pd::PdEvent::TimedOut(id) if id == subscriber) {
                    slog::warn!(logger, "subscription timed out");
                }
            }
        }
        Ok(())
    });

    session.close()
}
