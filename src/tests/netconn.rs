use crate::config::Config;
use crate::netconn::Netconn;
use crate::tests::mock::{answer, MockDevice};
use crate::types::ConnType;
use crate::Error;
use embedded_io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

fn device(config: Config) -> MockDevice {
    let device = MockDevice::start(config, answer);
    device.set_got_ip();
    device
}

fn client(device: &MockDevice) -> Netconn {
    let client = Netconn::new(&device.esp, ConnType::Tcp).unwrap();
    client.connect("192.168.1.2", 80).unwrap();
    client
}

/// Server handle listening on port 80
fn server(device: &MockDevice) -> Netconn {
    let server = Netconn::new(&device.esp, ConnType::Tcp).unwrap();
    server.bind(80).unwrap();
    server.listen().unwrap();
    server
}

fn remote_connects(device: &MockDevice, num: usize) {
    device.esp.input(
        format!(
            "{},CONNECT\r\n+LINK_CONN:0,{},\"TCP\",1,\"192.168.1.3\",51000,80\r\n",
            num, num
        )
        .as_bytes(),
    );
}

fn eventually(condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < Duration::from_secs(2), "Condition not reached");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_connect() {
    let device = device(Config::default());
    let client = client(&device);

    assert_eq!(Some(4), client.getconnnum());
    assert_eq!(ConnType::Tcp, client.conn_type());
    assert!(client.conn().unwrap().is_active());
}

#[test]
fn test_connect_without_ip() {
    let device = MockDevice::start(Config::default(), answer);
    let client = Netconn::new(&device.esp, ConnType::Tcp).unwrap();

    assert_eq!(Err(Error::NoIp), client.connect("192.168.1.2", 80));
    assert_eq!(None, client.getconnnum());
}

#[test]
fn test_receive() {
    let device = device(Config::default());
    let client = client(&device);

    device.esp.input(b"+IPD,4,5:HELLO\r\n");
    let pbuf = client.receive().unwrap();

    assert_eq!(b"HELLO".to_vec(), pbuf.to_vec());
    assert_eq!(0, client.rcv_packets());
}

#[test]
fn test_read_partial_buffers() {
    let device = device(Config::default());
    let mut client = client(&device);

    device.esp.input(b"+IPD,4,8:abcdefgh\r\n");

    let mut buf = [0u8; 3];
    assert_eq!(Ok(3), client.read(&mut buf));
    assert_eq!(b"abc", &buf);
    assert_eq!(Ok(3), client.read(&mut buf));
    assert_eq!(b"def", &buf);
    assert_eq!(Ok(2), client.read(&mut buf));
    assert_eq!(b"gh", &buf[..2]);

    // End of stream after the remote closed
    device.esp.input(b"4,CLOSED\r\n");
    assert_eq!(Ok(0), client.read(&mut buf));
    assert!(matches!(client.receive(), Err(Error::Closed)));
}

#[test]
fn test_remote_close() {
    let device = device(Config::default());
    let client = client(&device);

    device.esp.input(b"+IPD,4,2:hi\r\n4,CLOSED\r\n");

    // Data received before the close is still delivered
    assert_eq!(b"hi".to_vec(), client.receive().unwrap().to_vec());
    assert!(matches!(client.receive(), Err(Error::Closed)));
}

#[test]
fn test_write_and_flush() {
    let device = device(Config::default().conn_max_data_len(4));
    let client = client(&device);

    client.write(b"ab").unwrap();
    assert_eq!(0, device.count("AT+CIPSEND"));

    client.write(b"cdefghij").unwrap();
    assert_eq!(1, device.count("abcd"));
    assert_eq!(1, device.count("efgh"));
    assert_eq!(0, device.count("ij"));

    client.flush().unwrap();
    assert_eq!(1, device.count("ij"));
    assert_eq!(3, device.count("AT+CIPSEND=4,"));
}

#[test]
fn test_io_write() {
    let device = device(Config::default());
    let mut client = client(&device);

    assert_eq!(Ok(5), Write::write(&mut client, b"HELLO"));
    Write::flush(&mut client).unwrap();
    assert_eq!(1, device.count("AT+CIPSEND=4,5"));
}

#[test]
fn test_send_requires_udp() {
    let device = device(Config::default());
    let client = client(&device);

    assert_eq!(Err(Error::Par), client.send(b"HELLO"));
}

#[test]
fn test_close() {
    let device = device(Config::default());
    let client = client(&device);
    let conn = client.conn().unwrap();

    client.write(b"bye").unwrap();
    client.close().unwrap();

    assert_eq!(1, device.count("bye"));
    assert_eq!(1, device.count("AT+CIPCLOSE=4"));
    assert!(conn.is_closed());
    assert_eq!(None, client.getconnnum());
    assert!(matches!(client.receive(), Err(Error::Closed)));
}

#[test]
fn test_accept() {
    let device = device(Config::default());
    let server = server(&device);
    assert_eq!(1, device.count("AT+CIPSERVER=1,80"));

    remote_connects(&device, 0);
    let accepted = server.accept().unwrap();
    assert_eq!(Some(0), accepted.getconnnum());
    assert!(accepted.conn().unwrap().is_server());

    device.esp.input(b"+IPD,0,2:hi\r\n");
    assert_eq!(b"hi".to_vec(), accepted.receive().unwrap().to_vec());

    server.close().unwrap();
    assert_eq!(1, device.count("AT+CIPSERVER=0"));
    assert!(matches!(server.accept(), Err(Error::Par)));
}

#[test]
fn test_accept_blocks_until_connected() {
    let device = device(Config::default());
    let server = server(&device);

    let esp = device.esp.clone();
    let remote = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        esp.input(b"1,CONNECT\r\n+LINK_CONN:0,1,\"TCP\",1,\"192.168.1.3\",51000,80\r\n");
    });

    let accepted = server.accept().unwrap();
    assert_eq!(Some(1), accepted.getconnnum());
    remote.join().unwrap();
}

#[test]
fn test_accept_requires_listen() {
    let device = device(Config::default());
    let server = Netconn::new(&device.esp, ConnType::Tcp).unwrap();
    server.bind(80).unwrap();

    assert!(matches!(server.accept(), Err(Error::Par)));
}

#[test]
fn test_listen_requires_tcp() {
    let device = device(Config::default());
    let udp = Netconn::new(&device.esp, ConnType::Udp).unwrap();

    assert_eq!(Err(Error::Par), udp.listen());
}

#[test]
fn test_unwanted_connection_closed() {
    let device = device(Config::default());
    let server = Netconn::new(&device.esp, ConnType::Tcp).unwrap();
    server.bind(80).unwrap();

    // Server enabled, but nobody listens
    remote_connects(&device, 2);
    eventually(|| device.count("AT+CIPCLOSE=2") == 1);
}

#[test]
fn test_accept_after_wifi_lost() {
    let device = device(Config::default());
    let server = server(&device);

    device.esp.input(b"WIFI DISCONNECT\r\n");
    assert!(matches!(server.accept(), Err(Error::WifiNotConnected)));

    // Listener was dropped
    assert!(matches!(server.accept(), Err(Error::Par)));
}

#[test]
fn test_accept_after_device_lost() {
    let device = device(Config::default());
    let server = server(&device);

    device.esp.set_device_present(false, true).unwrap();
    assert!(matches!(server.accept(), Err(Error::NoDevice)));
}

#[test]
fn test_delete_drops_listener() {
    let device = device(Config::default());
    let server = server(&device);
    server.delete();

    remote_connects(&device, 0);
    eventually(|| device.count("AT+CIPCLOSE=0") == 1);
}

#[cfg(feature = "netconn-receive-timeout")]
#[test]
fn test_receive_timeout() {
    let device = device(Config::default());
    let client = client(&device);

    client.set_receive_timeout(Some(embassy_time::Duration::from_millis(20)));
    assert_eq!(Some(embassy_time::Duration::from_millis(20)), client.get_receive_timeout());
    assert!(matches!(client.receive(), Err(Error::Timeout)));

    // Connection is still usable
    device.esp.input(b"+IPD,4,2:ok\r\n");
    assert_eq!(b"ok".to_vec(), client.receive().unwrap().to_vec());
}

#[test]
fn test_handles_registered() {
    let device = device(Config::default());
    let first = Netconn::new(&device.esp, ConnType::Tcp).unwrap();
    let second = Netconn::new(&device.esp, ConnType::Udp).unwrap();

    let handles = Netconn::handles(&device.esp);
    assert_eq!(2, handles.len());
    assert!(handles.iter().any(|handle| handle.ptr_eq(&first)));
    assert!(handles.iter().any(|handle| handle.ptr_eq(&second)));
    drop(handles);

    first.delete();
    let handles = Netconn::handles(&device.esp);
    assert_eq!(1, handles.len());
    assert!(handles[0].ptr_eq(&second));
}

#[test]
fn test_delete_listener_unregisters() {
    let device = device(Config::default());
    let server = server(&device);

    remote_connects(&device, 0);
    let accepted = server.accept().unwrap();
    assert_eq!(2, Netconn::handles(&device.esp).len());

    server.delete();
    let handles = Netconn::handles(&device.esp);
    assert_eq!(1, handles.len());
    assert!(handles[0].ptr_eq(&accepted));
}

#[test]
fn test_close_keeps_registration() {
    let device = device(Config::default());
    let client = client(&device);

    client.close().unwrap();
    assert_eq!(1, Netconn::handles(&device.esp).len());

    client.delete();
    assert!(Netconn::handles(&device.esp).is_empty());
}

#[test]
fn test_close_after_remote_close() {
    let device = device(Config::default());
    let client = client(&device);
    let conn = client.conn().unwrap();

    device.esp.input(b"4,CLOSED\r\n");
    eventually(|| conn.is_closed());

    // Closing the stale connection fails, teardown of the handle still completes
    assert_eq!(Ok(()), client.close());
    assert_eq!(None, client.getconnnum());
    assert_eq!(0, device.count("AT+CIPCLOSE"));
    assert!(matches!(client.receive(), Err(Error::Closed)));
}
