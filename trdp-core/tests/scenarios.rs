//! End-to-end scenarios over real loopback sockets, one `Session` per
//! participant, matching the literal configurations in spec §8. S5
//! (marshalling of a variable-length mixed dataset) is a pure wire-codec
//! property and lives in `trdp-wire`'s own test suite instead.

use std::net::Ipv4Addr;
use std::time::Duration;
use trdp_core::config::SessionConfig;
use trdp_core::md::session_table::Transport;
use trdp_core::md::{ListenerFlags, MdEvent, MdResult};
use trdp_core::pd::{PdEvent, TimeoutPolicy};
use trdp_core::{Session, SessionEvent};
use trdp_wire::marshal::{DatasetDescriptor, DatasetValue, ElementDescriptor, ElementType, EmptyRegistry};

fn scalar_u8_dataset() -> DatasetDescriptor {
    DatasetDescriptor {
        dataset_id: 1,
        elements: vec![ElementDescriptor { element_type: ElementType::UInt8, count: 1 }],
    }
}

fn open_on(local_ip: &str, pd_port: u16, md_udp_port: u16, md_tcp_port: u16) -> Session {
    let mut config = SessionConfig::default();
    config.pd.port = pd_port;
    config.md.udp_port = md_udp_port;
    config.md.tcp_port = md_tcp_port;
    Session::open(local_ip.parse().unwrap(), config, Box::new(EmptyRegistry), None).unwrap()
}

/// S1 — PD publish/subscribe single-byte dataset: value written by the
/// publisher arrives in the subscriber's Traffic Store slice within one
/// interval, and a stopped publisher's subscriber times out.
#[test]
fn s1_pd_publish_subscribe_single_byte_dataset() {
    let publisher_ip = "127.1.1.1";
    let subscriber_ip = "127.1.1.2";
    let mut publisher = open_on(publisher_ip, 28001, 28101, 28201);
    let mut subscriber = open_on(subscriber_ip, 28001, 28101, 28201);

    publisher
        .publish(
            1000,
            subscriber_ip.parse().unwrap(),
            Duration::from_millis(5),
            0,
            scalar_u8_dataset(),
            &[DatasetValue::UInt8(0x42)],
        )
        .unwrap();
    let sub_id = subscriber
        .subscribe(
            1000,
            None,
            subscriber_ip.parse().unwrap(),
            Duration::from_millis(60),
            TimeoutPolicy::KeepLast,
            scalar_u8_dataset(),
            1,
        )
        .unwrap();

    publisher.process(Some(Duration::from_millis(20))).unwrap();
    let events = subscriber.process(Some(Duration::from_millis(50))).unwrap();
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Pd(PdEvent::Updated(id)) if *id == sub_id)));
    assert_eq!(subscriber.read_subscription(sub_id), &[0x42]);

    // Publisher stops; subscriber's timeout window elapses from the last
    // received datagram.
    publisher.close().unwrap();
    std::thread::sleep(Duration::from_millis(70));
    let events = subscriber.process(Some(Duration::from_millis(10))).unwrap();
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Pd(PdEvent::TimedOut(id)) if *id == sub_id)));

    subscriber.close().unwrap();
}

/// S2 — MD notify with a srcURI of exactly 32 bytes: the responder's
/// listener receives the payload and a notify carries no session (the
/// delivered uuid is all zeros).
#[test]
fn s2_md_notify_with_32_byte_source_uri() {
    let caller_ip = "127.1.2.1";
    let responder_ip = "127.1.2.2";
    let mut caller = open_on(caller_ip, 28002, 28102, 28202);
    let mut responder = open_on(responder_ip, 28002, 28102, 28202);

    responder.add_listener(2000, None, None, String::new(), 0, ListenerFlags::default()).unwrap();

    let src_uri = "12345678901234567890123456789012";
    assert_eq!(src_uri.len(), 32);
    caller.notify(2000, responder_ip.parse().unwrap(), src_uri, "", b"Hello").unwrap();

    caller.process(Some(Duration::from_millis(20))).unwrap();
    let events = responder.process(Some(Duration::from_millis(50))).unwrap();
    let request = events.iter().find_map(|e| match e {
        SessionEvent::Md(MdEvent::Request { uuid, payload, .. }) => Some((*uuid, payload.clone())),
        _ => None,
    });
    let (uuid, payload) = request.expect("notify delivered as an Mn request");
    assert_eq!(payload, b"Hello");
    assert_eq!(uuid, [0u8; 16]);

    caller.close().unwrap();
    responder.close().unwrap();
}

/// S3 — MD request with 2 expected replies over UDP: both responders'
/// replies are delivered to the caller.
#[test]
fn s3_md_request_two_expected_replies_over_udp() {
    let caller_ip = "127.1.3.1";
    let responder_a_ip = "127.1.3.2";
    let responder_b_ip = "127.1.3.3";
    let mut caller = open_on(caller_ip, 28003, 28103, 28203);
    let mut responder_a = open_on(responder_a_ip, 28003, 28103, 28203);
    let mut responder_b = open_on(responder_b_ip, 28003, 28103, 28203);

    responder_a.add_listener(3000, None, None, String::new(), 0, ListenerFlags::default()).unwrap();
    responder_b.add_listener(3000, None, None, String::new(), 0, ListenerFlags::default()).unwrap();

    let uuid_a = caller
        .request(3000, responder_a_ip.parse().unwrap(), "", "", 2, Transport::Udp, Duration::from_secs(1), b"req")
        .unwrap();
    let uuid_b = caller
        .request(3000, responder_b_ip.parse().unwrap(), "", "", 2, Transport::Udp, Duration::from_secs(1), b"req")
        .unwrap();

    caller.process(Some(Duration::from_millis(20))).unwrap();
    for responder in [&mut responder_a, &mut responder_b] {
        let events = responder.process(Some(Duration::from_millis(50))).unwrap();
        for event in events {
            if let SessionEvent::Md(MdEvent::Request { uuid, .. }) = event {
                responder.reply(uuid, b"ok").unwrap();
            }
        }
    }
    responder_a.process(Some(Duration::from_millis(20))).unwrap();
    responder_b.process(Some(Duration::from_millis(20))).unwrap();

    let events = caller.process(Some(Duration::from_millis(50))).unwrap();
    let mut seen = Vec::new();
    for event in events {
        if let SessionEvent::Md(MdEvent::Reply { uuid, payload }) = event {
            assert_eq!(payload, b"ok");
            seen.push(uuid);
        }
    }
    assert!(seen.contains(&uuid_a));
    assert!(seen.contains(&uuid_b));

    caller.close().unwrap();
    responder_a.close().unwrap();
    responder_b.close().unwrap();
}

/// S4 — MD request/reply-query/confirm over TCP: responder answers with Mq,
/// caller auto-confirms, responder observes the confirmation.
#[test]
fn s4_md_request_reply_query_confirm_over_tcp() {
    let caller_ip = "127.1.4.1";
    let responder_ip = "127.1.4.2";
    let mut caller = open_on(caller_ip, 28004, 28104, 28204);
    let mut responder = open_on(responder_ip, 28004, 28104, 28204);

    responder.add_listener(3001, None, None, String::new(), 0, ListenerFlags::default()).unwrap();

    let uuid = caller
        .request(3001, responder_ip.parse().unwrap(), "", "", 1, Transport::Tcp, Duration::from_secs(1), b"req")
        .unwrap();

    // A single interleaved drive loop: the TCP connect handshake, the Mr,
    // the Mq and the Mc each land on a different tick, so every tick's
    // events from both sides must be inspected, not just the ones from
    // whichever side we happen to be waiting on.
    let mut responder_saw_request = false;
    let mut caller_confirmed = false;
    let mut responder_confirmed = false;
    for _ in 0..10 {
        for event in caller.process(Some(Duration::from_millis(20))).unwrap() {
            if let SessionEvent::Md(MdEvent::ReplyQuery { uuid: u, payload }) = event {
                assert_eq!(u, uuid);
                assert_eq!(payload, b"?");
                caller.confirm(u).unwrap();
                caller_confirmed = true;
            }
        }
        for event in responder.process(Some(Duration::from_millis(20))).unwrap() {
            match event {
                SessionEvent::Md(MdEvent::Request { uuid: u, .. }) => {
                    assert_eq!(u, uuid);
                    responder_saw_request = true;
                    responder.reply_query(u, b"?").unwrap();
                }
                SessionEvent::Md(MdEvent::Confirmed { uuid: u }) if u == uuid => {
                    responder_confirmed = true;
                }
                _ => {}
            }
        }
        if responder_confirmed {
            break;
        }
    }
    assert!(responder_saw_request, "responder never saw the Mr");
    assert!(caller_confirmed, "caller never saw the Mq");
    assert!(responder_confirmed, "responder never saw the Mc");

    caller.close().unwrap();
    responder.close().unwrap();
}

/// S6 — Pull request/reply: the responder's publisher (interval zero, i.e.
/// pull-only) fires exactly once per `request_pull`, delivering the current
/// value to the caller's subscriber.
#[test]
fn s6_pull_request_reply() {
    let responder_ip = "127.1.6.1";
    let caller_ip = "127.1.6.2";
    let mut responder = open_on(responder_ip, 28006, 28106, 28206);
    let mut caller = open_on(caller_ip, 28006, 28106, 28206);

    responder
        .publish(
            4000,
            caller_ip.parse().unwrap(),
            Duration::ZERO,
            0,
            scalar_u8_dataset(),
            &[DatasetValue::UInt8(0x7A)],
        )
        .unwrap();
    let sub_id = caller
        .subscribe(
            4000,
            None,
            caller_ip.parse().unwrap(),
            Duration::from_millis(300),
            TimeoutPolicy::KeepLast,
            scalar_u8_dataset(),
            1,
        )
        .unwrap();

    // No cyclic traffic before the pull request: responder has nothing to
    // send on its own.
    responder.process(Some(Duration::from_millis(20))).unwrap();
    let events = caller.process(Some(Duration::from_millis(20))).unwrap();
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Pd(PdEvent::Updated(_)))));

    caller.request_pull(4000, 4000, responder_ip.parse().unwrap()).unwrap();
    responder.process(Some(Duration::from_millis(50))).unwrap();
    let events = caller.process(Some(Duration::from_millis(50))).unwrap();
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Pd(PdEvent::Updated(id)) if *id == sub_id)));
    assert_eq!(caller.read_subscription(sub_id), &[0x7A]);

    responder.close().unwrap();
    caller.close().unwrap();
}

/// R1 — publish/unpublish/publish succeeds again at the same (comId,
/// destIP).
#[test]
fn r1_unpublish_then_republish_succeeds() {
    let mut session = open_on("127.1.7.1", 28007, 28107, 28207);
    let dest: Ipv4Addr = "127.1.7.2".parse().unwrap();
    let id = session.publish(5000, dest, Duration::from_millis(100), 0, scalar_u8_dataset(), &[DatasetValue::UInt8(1)]).unwrap();
    session.unpublish(id).unwrap();
    session.publish(5000, dest, Duration::from_millis(100), 0, scalar_u8_dataset(), &[DatasetValue::UInt8(1)]).unwrap();
    session.close().unwrap();
}

/// R2 — addListener/delListener/addListener succeeds both adds.
#[test]
fn r2_delete_listener_then_readd_succeeds() {
    let mut session = open_on("127.1.8.1", 28008, 28108, 28208);
    let id = session.add_listener(6000, None, None, String::new(), 0, ListenerFlags::default()).unwrap();
    session.delete_listener(id).unwrap();
    session.add_listener(6000, None, None, String::new(), 0, ListenerFlags::default()).unwrap();
    session.close().unwrap();
}

/// Abort path: a caller's in-flight request can be cancelled without
/// waiting out the reply timeout, and no further events arrive for it.
#[test]
fn request_abort_short_circuits_the_reply_timeout() {
    let mut session = open_on("127.1.9.1", 28009, 28109, 28209);
    let uuid = session
        .request(7000, "127.1.9.2".parse().unwrap(), "", "", 1, Transport::Udp, Duration::from_secs(10), b"req")
        .unwrap();
    let event = session.abort_session(uuid);
    assert!(matches!(event, Some(MdEvent::Final { uuid: u, result: MdResult::Aborted }) if u == uuid));
    session.close().unwrap();
}
