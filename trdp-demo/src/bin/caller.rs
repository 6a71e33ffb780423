//! Sends an Mr request and waits for the final reply or timeout (spec
//! §4.4 "IDLE --request-->").
use clap::Parser;
use std::time::Duration;
use trdp_core::md::session_table::Transport;
use trdp_demo::{CommonArgs, DemoRegistry};

#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Reply timeout in milliseconds (spec §4.4 "replyTimeout").
    #[arg(long, default_value_t = 1000)]
    reply_timeout_ms: u64,

    /// Payload string sent with the request.
    #[arg(long, default_value = "hello")]
    payload: String,
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

    let uuid = session.request(
        args.common.com_id,
        args.common.dest_ip,
        "caller",
        "replier",
        1,
        Transport::Udp,
        Duration::from_millis(args.reply_timeout_ms),
        args.payload.as_bytes(),
    )?;

    slog::info!(logger, "request sent"; "uuid" => ?uuid);

    loop {
        let events = session.process(Some(Duration::from_millis(args.reply_timeout_ms)))?;
        let mut done = false;
        for event in events {
            if let trdp_core::SessionEvent::Md(md_event) = event {
                match md_event {
                    trdp_core::md::MdEvent::Reply { uuid: u, payload } if u == uuid => {
                        slog::info!(logger, "reply received"; "payload" => %String::from_utf8_lossy(&payload));
                        done = true;
                    }
                    trdp_core::md::MdEvent::Final { uuid: u, result } if u == uuid => {
                        slog::info!(logger, "request finished"; "result" => ?result);
                        done = true;
                    }
                    _ => {}
                }
            }
        }
        if done {
            break;
        }
    }

    session.close()
}
