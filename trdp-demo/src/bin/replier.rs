//! Listens for Mr requests and answers every one with "ok" (spec §4.4
//! "IDLE --request--> ReqRecvd --reply-->").
use clap::Parser;
use trdp_core::md::ListenerFlags;
use trdp_demo::{CommonArgs, DemoRegistry};

#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
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

    session.add_listener(args.common.com_id, None, None, String::new(), 0, ListenerFlags::default())?;
    slog::info!(logger, "listening"; "com_id" => args.common.com_id);

    trdp_demo::run_loop(args.common.iterations, || {
        let events = session.process(None)?;
        for event in events {
            if let trdp_core::SessionEvent::Md(trdp_core::md::MdEvent::Request { uuid, payload, .. }) = event {
                slog::info!(logger, "request received"; "payload" => %String::from_utf8_lossy(&payload));
                session.reply(uuid, b"ok")?;
            }
        }
        Ok(())
    });

    session.close()
}
