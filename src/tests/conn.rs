use crate::config::Config;
use crate::event::{Arg, Event, EventKind, Flow};
use crate::tests::mock::{answer, recorder, wait_for, MockDevice};
use crate::Error;
use alloc::sync::Arc;
use embassy_time::Duration;
use embedded_nal::Ipv4Addr;

fn device(config: Config) -> MockDevice {
    let device = MockDevice::start(config, answer);
    device.set_got_ip();
    device
}

#[test]
fn test_connect() {
    let device = device(Config::default());
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    // Highest free slot is used first
    assert_eq!(4, conn.num());
    assert!(conn.is_active());
    assert!(conn.is_client());
    assert_eq!(Some(Ipv4Addr::new(192, 168, 1, 2)), conn.remote_ip());
    assert_eq!(Some(80), conn.remote_port());
    assert_eq!(1, device.count("AT+CIPSTART=4,\"TCP\",\"192.168.1.2\",80"));

    match wait_for(&events, EventKind::ConnActive) {
        Event::ConnActive { conn: active, client, .. } => {
            assert_eq!(conn, active);
            assert!(client);
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_arg() {
    let device = device(Config::default());
    let (cb, _events) = recorder(Flow::Continue);
    let conn = device.connect(cb);
    assert!(conn.arg().is_none());

    let arg: Arg = Arc::new(String::from("context"));
    conn.set_arg(Some(arg)).unwrap();
    let arg = conn.arg().unwrap();
    assert_eq!(Some(&String::from("context")), arg.downcast_ref::<String>());
}

#[test]
fn test_send() {
    let device = device(Config::default());
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    assert_eq!(Ok(5), conn.send(b"HELLO", true));
    assert_eq!(1, device.count("AT+CIPSEND=4,5\r\n"));
    assert_eq!(1, device.count("HELLO"));

    match wait_for(&events, EventKind::ConnSent) {
        Event::ConnSent { sent, .. } => assert_eq!(5, sent),
        _ => unreachable!(),
    }
}

#[test]
fn test_send_empty() {
    let device = device(Config::default());
    let (cb, _events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    assert_eq!(Err(Error::Par), conn.send(b"", true));
}

#[test]
fn test_close_twice() {
    let device = device(Config::default());
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    assert_eq!(Ok(()), conn.close(true));
    assert!(conn.is_closed());
    assert_eq!(Err(Error::Err), conn.close(true));
    assert_eq!(1, device.count("AT+CIPCLOSE=4"));

    match wait_for(&events, EventKind::ConnClosed) {
        Event::ConnClosed { forced, client, .. } => {
            assert!(forced);
            assert!(client);
        }
        _ => unreachable!(),
    }

    assert_eq!(Err(Error::Closed), conn.send(b"HELLO", true));
}

#[test]
fn test_close_non_blocking() {
    let device = device(Config::default());
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    assert_eq!(Ok(()), conn.close(false));

    // Rejected while the device did not answer yet, as well as afterwards
    assert_eq!(Err(Error::Err), conn.close(false));

    wait_for(&events, EventKind::ConnClosed);
    assert!(conn.is_closed());
}

#[test]
fn test_stale_handle() {
    let device = device(Config::default());
    let (cb, _events) = recorder(Flow::Continue);
    let first = device.connect(cb.clone());
    first.close(true).unwrap();

    let second = device.connect(cb);
    assert_eq!(first.num(), second.num());
    assert_ne!(first, second);
    assert!(first.is_closed());
    assert!(second.is_active());
    assert_eq!(None, first.remote_ip());
}

#[test]
fn test_write_buffers_small_writes() {
    let device = device(Config::default().conn_max_data_len(8));
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    assert_eq!(Ok(5), conn.write(b"abc", false));
    assert_eq!(0, device.count("AT+CIPSEND"));

    // Completed chunk is sent
    assert_eq!(Ok(8), conn.write(b"defgh", false));
    match wait_for(&events, EventKind::ConnSent) {
        Event::ConnSent { sent, .. } => assert_eq!(8, sent),
        _ => unreachable!(),
    }
    assert_eq!(1, device.count("abcdefgh"));

    // Flush sends the rest
    assert_eq!(Ok(8), conn.write(b"xy", true));
    match wait_for(&events, EventKind::ConnSent) {
        Event::ConnSent { sent, .. } => assert_eq!(2, sent),
        _ => unreachable!(),
    }
    assert_eq!(1, device.count("AT+CIPSEND=4,2"));
}

#[test]
fn test_send_flushes_write_buffer() {
    let device = device(Config::default());
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    conn.write(b"ab", false).unwrap();
    assert_eq!(Ok(2), conn.send(b"cd", true));

    wait_for(&events, EventKind::ConnSent);
    assert_eq!(1, device.count("abcd"));
}

#[test]
fn test_close_sends_buffered_data() {
    let device = device(Config::default());
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    conn.write(b"bye", false).unwrap();
    conn.close(true).unwrap();

    wait_for(&events, EventKind::ConnClosed);
    let written = device.written();
    let payload = written.iter().position(|data| data == "bye").unwrap();
    let close = written.iter().position(|data| data.starts_with("AT+CIPCLOSE")).unwrap();
    assert!(payload < close);
}

#[test]
fn test_update_status_closes_unreported() {
    let device = device(Config::default());
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    // Device reports no connection at all
    device.esp.update_status(true).unwrap();

    match wait_for(&events, EventKind::ConnClosed) {
        Event::ConnClosed { forced, .. } => assert!(!forced),
        _ => unreachable!(),
    }
    assert!(conn.is_closed());
}

#[test]
fn test_poll() {
    let device = device(Config::default().conn_poll_interval(Duration::from_millis(20)));
    let (cb, events) = recorder(Flow::Continue);
    let conn = device.connect(cb);

    match wait_for(&events, EventKind::ConnPoll) {
        Event::ConnPoll { conn: polled } => assert_eq!(conn, polled),
        _ => unreachable!(),
    }
    wait_for(&events, EventKind::ConnPoll);
}
