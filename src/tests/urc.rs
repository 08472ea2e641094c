use crate::parser::{IpField, IpdHeader};
use crate::types::{ConnType, Mac, Version};
use crate::urc::Line;
use atat::AtatUrc;
use embedded_nal::Ipv4Addr;

fn parse(line: &[u8]) -> Line {
    <Line as AtatUrc>::parse(line).unwrap()
}

#[test]
fn test_parse_terminal_lines() {
    assert_eq!(Line::Ok, parse(b"OK\r\n"));
    assert_eq!(Line::Error, parse(b"ERROR\r\n"));
    assert_eq!(Line::Error, parse(b"FAIL\r\n"));
    assert_eq!(Line::Ready, parse(b"ready\r\n"));
    assert_eq!(Line::SendOk, parse(b"SEND OK\r\n"));
    assert_eq!(Line::SendFail, parse(b"SEND FAIL\r\n"));
}

#[test]
fn test_parse_wifi_lines() {
    assert_eq!(Line::WifiConnected, parse(b"WIFI CONNECTED\r\n"));
    assert_eq!(Line::WifiDisconnected, parse(b"WIFI DISCONNECT\r\n"));
    assert_eq!(Line::WifiGotIp, parse(b"WIFI GOT IP\r\n"));
}

#[test]
fn test_parse_ipd_header() {
    assert_eq!(
        Line::Ipd(IpdHeader {
            conn: 0,
            len: 5,
            ip: Ipv4Addr::new(192, 168, 1, 2),
            port: 80,
        }),
        parse(b"+IPD,0,5,192.168.1.2,80:")
    );
    assert_eq!(Line::Unknown, parse(b"+IPD,x:"));
}

#[test]
fn test_parse_link_conn_after_other_output() {
    match parse(b"0,CONNECT+LINK_CONN:0,0,\"TCP\",0,\"192.168.1.2\",80,50000\r\n") {
        Line::LinkConn(link) => {
            assert_eq!(0, link.num);
            assert_eq!(ConnType::Tcp, link.conn_type);
            assert!(!link.is_server);
            assert_eq!(50000, link.local_port);
        }
        line => panic!("Unexpected line {:?}", line),
    }
}

#[test]
fn test_parse_closed() {
    assert_eq!(Line::Closed(3), parse(b"3,CLOSED\r\n"));
    assert_eq!(Line::ConnectFail(1), parse(b"1,CONNECT FAIL\r\n"));
    assert_eq!(Line::Unknown, parse(b"CLOSED\r\n"));
}

#[test]
fn test_parse_versions() {
    assert_eq!(
        Line::AtVersion(Version {
            major: 1,
            minor: 6,
            patch: 2
        }),
        parse(b"AT version:1.6.2.0(Apr 13 2018 11:10:59)\r\n")
    );
    assert_eq!(
        Line::SdkVersion(Version {
            major: 2,
            minor: 2,
            patch: 1
        }),
        parse(b"SDK version:2.2.1(6ab97e9)\r\n")
    );
}

#[test]
fn test_parse_addresses() {
    assert_eq!(
        Line::StaIp(IpField::Ip, Ipv4Addr::new(192, 168, 1, 10)),
        parse(b"+CIPSTA:ip:\"192.168.1.10\"\r\n")
    );
    assert_eq!(
        Line::ApIp(IpField::Gateway, Ipv4Addr::new(192, 168, 4, 1)),
        parse(b"+CIPAP_CUR:gateway:\"192.168.4.1\"\r\n")
    );
    assert_eq!(
        Line::StaMac(Mac([0x18, 0xfe, 0x34, 0, 0, 1])),
        parse(b"+CIPSTAMAC:\"18:fe:34:00:00:01\"\r\n")
    );
    assert_eq!(
        Line::ApMac(Mac([0x1a, 0xfe, 0x34, 0, 0, 1])),
        parse(b"+CIPAPMAC_CUR:\"1a:fe:34:00:00:01\"\r\n")
    );
}

#[test]
fn test_parse_stored_addresses_unknown() {
    assert_eq!(Line::Unknown, parse(b"+CIPSTA_DEF:ip:\"192.168.1.10\"\r\n"));
    assert_eq!(Line::Unknown, parse(b"+CIPAPMAC_DEF:\"1a:fe:34:00:00:01\"\r\n"));
}

#[test]
fn test_parse_join_status() {
    assert_eq!(Line::JoinStatus(2), parse(b"+CWJAP:2\r\n"));

    // Query response of a joined station is no error code
    assert_eq!(Line::Unknown, parse(b"+CWJAP:\"home\",\"ca:d7:19:d8:a6:44\",6,-45\r\n"));
}

#[test]
fn test_parse_access_point() {
    match parse(b"+CWLAP:(3,\"home\",-45,\"ca:d7:19:d8:a6:44\",6,-12,0)\r\n") {
        Line::AccessPoint(access_point) => {
            assert_eq!("home", access_point.ssid.as_str());
            assert_eq!(-45, access_point.rssi);
        }
        line => panic!("Unexpected line {:?}", line),
    }
}

#[test]
fn test_parse_misc_responses() {
    assert_eq!(
        Line::Domain(Ipv4Addr::new(93, 184, 216, 34)),
        parse(b"+CIPDOMAIN:93.184.216.34\r\n")
    );
    assert_eq!(Line::PingTime(12), parse(b"+12\r\n"));
    assert_eq!(Line::Hostname("espressif".try_into().unwrap()), parse(b"+CWHOSTNAME:espressif\r\n"));
    assert!(matches!(parse(b"+CIPSNTPTIME:Thu Aug 04 14:48:05 2016\r\n"), Line::SntpTime(_)));
}

#[test]
fn test_parse_access_point_stations() {
    let mac = Mac([0x18, 0xfe, 0x34, 0, 0, 2]);
    assert_eq!(Line::StaConnected(mac), parse(b"+STA_CONNECTED:\"18:fe:34:00:00:02\"\r\n"));
    assert_eq!(Line::StaDisconnected(mac), parse(b"+STA_DISCONNECTED:\"18:fe:34:00:00:02\"\r\n"));
    assert_eq!(
        Line::DistStaIp(mac, Ipv4Addr::new(192, 168, 4, 2)),
        parse(b"+DIST_STA_IP:\"18:fe:34:00:00:02\",\"192.168.4.2\"\r\n")
    );
}

#[test]
fn test_parse_status_entry() {
    match parse(b"+CIPSTATUS:0,\"TCP\",\"192.168.1.2\",80,50000,0\r\n") {
        Line::Status(status) => {
            assert_eq!(0, status.num);
            assert!(status.client);
        }
        line => panic!("Unexpected line {:?}", line),
    }
}

#[test]
fn test_parse_unknown() {
    assert_eq!(Line::Unknown, parse(b"AT+CIPSTATUS\r\n"));
    assert_eq!(Line::Unknown, parse(b"STATUS:2\r\n"));
    assert_eq!(Line::Unknown, parse(b"\r\n"));
    assert_eq!(Line::Unknown, parse(b"+UNKNOWN:1\r\n"));
}
