//! Classification of received lines
//!
//! Every complete line (and the `+IPD` header, which ends with `:` instead of CRLF) is mapped to a
//! [Line] without any knowledge about the command in flight. The engine decides afterwards which
//! tokens are relevant for the current command.
use crate::parser::{
    parse_cipstatus, parse_cipsta_cipap, parse_cwlap, parse_hostname, parse_ip, parse_ipd, parse_link_conn,
    parse_mac, parse_mac_response, parse_number, parse_sntp_time, parse_version, ConnStatus, IpField, IpdHeader,
    LinkConn,
};
use crate::types::{AccessPoint, DateTime, Mac, Version, HOSTNAME_LEN};
use atat::AtatUrc;
use embedded_nal::Ipv4Addr;
use heapless::String;

/// Typed representation of one received line
#[derive(Clone, Debug, PartialEq)]
pub enum Line {
    /// Command finished successfully
    Ok,
    /// Command failed (`ERROR` or `FAIL`)
    Error,
    /// Device (re)started
    Ready,
    /// Payload was transmitted
    SendOk,
    /// Payload transmission failed
    SendFail,
    /// Header of received payload, raw bytes follow
    Ipd(IpdHeader),
    /// Connection became active or failed
    LinkConn(LinkConn),
    /// Connection with the given number closed
    Closed(usize),
    /// Connection with the given number could not be established
    ConnectFail(usize),
    WifiConnected,
    WifiDisconnected,
    WifiGotIp,
    /// `AT version:` line of `AT+GMR`
    AtVersion(Version),
    /// `SDK version:` line of `AT+GMR`
    SdkVersion(Version),
    /// Address of the station
    StaIp(IpField, Ipv4Addr),
    /// Address of the soft access point
    ApIp(IpField, Ipv4Addr),
    StaMac(Mac),
    ApMac(Mac),
    /// Access point scan entry
    AccessPoint(AccessPoint),
    /// Error code while joining an access point
    JoinStatus(i32),
    /// DNS lookup result
    Domain(Ipv4Addr),
    /// Ping round trip time in ms
    PingTime(u32),
    SntpTime(DateTime),
    Hostname(String<HOSTNAME_LEN>),
    /// Station joined the soft access point
    StaConnected(Mac),
    /// Station left the soft access point
    StaDisconnected(Mac),
    /// Soft access point assigned an IP to a station
    DistStaIp(Mac, Ipv4Addr),
    /// Connection entry of `AT+CIPSTATUS`
    Status(ConnStatus),
    /// Anything else, e.g. command echo
    Unknown,
}

impl AtatUrc for Line {
    type Response = Self;

    fn parse(resp: &[u8]) -> Option<Self::Response> {
        let line = resp.strip_suffix(b"\r\n").unwrap_or(resp);

        match line {
            b"OK" => return Some(Self::Ok),
            b"ERROR" | b"FAIL" => return Some(Self::Error),
            b"ready" => return Some(Self::Ready),
            b"SEND OK" => return Some(Self::SendOk),
            b"SEND FAIL" => return Some(Self::SendFail),
            b"WIFI CONNECTED" => return Some(Self::WifiConnected),
            b"WIFI DISCONNECT" => return Some(Self::WifiDisconnected),
            b"WIFI GOT IP" => return Some(Self::WifiGotIp),
            _ => {}
        }

        if let Some(header) = line.strip_prefix(b"+IPD,") {
            return Some(parse_ipd(header).map(Self::Ipd).unwrap_or(Self::Unknown));
        }

        // May be preceded by other output of the device
        if let Some(position) = find(line, b"+LINK_CONN:") {
            let link = parse_link_conn(&line[position + 11..]);
            return Some(link.map(Self::LinkConn).unwrap_or(Self::Unknown));
        }

        if line.starts_with(b"+") {
            return Some(Self::parse_response(line).unwrap_or(Self::Unknown));
        }

        if let Some(version) = line.strip_prefix(b"AT version:") {
            return Some(Self::AtVersion(parse_version(version)));
        }

        if let Some(version) = line.strip_prefix(b"SDK version:") {
            return Some(Self::SdkVersion(parse_version(version)));
        }

        if let Some(num) = Self::parse_link_id(resp, b",CLOSED\r\n") {
            return Some(Self::Closed(num));
        }

        if let Some(num) = Self::parse_link_id(resp, b",CONNECT FAIL\r\n") {
            return Some(Self::ConnectFail(num));
        }

        Some(Self::Unknown)
    }
}

impl Line {
    /// Maps `+` prefixed responses and notifications
    fn parse_response(line: &[u8]) -> Option<Self> {
        if let Some(rest) = line.strip_prefix(b"+CWJAP:") {
            return rest.first().filter(|c| c.is_ascii_digit()).map(|_| {
                let mut rest = rest;
                Self::JoinStatus(parse_number(&mut rest))
            });
        }

        if let Some(rest) = line.strip_prefix(b"+CIPSTATUS:") {
            return parse_cipstatus(rest).map(Self::Status);
        }

        if let Some(rest) = line.strip_prefix(b"+CIPSTAMAC") {
            return parse_mac_response(rest).map(Self::StaMac);
        }

        if let Some(rest) = line.strip_prefix(b"+CIPAPMAC") {
            return parse_mac_response(rest).map(Self::ApMac);
        }

        if let Some(rest) = line.strip_prefix(b"+CIPSTA") {
            return parse_cipsta_cipap(rest).map(|(field, ip)| Self::StaIp(field, ip));
        }

        if let Some(rest) = line.strip_prefix(b"+CIPAP") {
            return parse_cipsta_cipap(rest).map(|(field, ip)| Self::ApIp(field, ip));
        }

        if let Some(rest) = line.strip_prefix(b"+CWLAP:") {
            return parse_cwlap(rest).map(Self::AccessPoint);
        }

        if let Some(mut rest) = line.strip_prefix(b"+CIPDOMAIN:") {
            return Some(Self::Domain(parse_ip(&mut rest)));
        }

        if let Some(rest) = line.strip_prefix(b"+CIPSNTPTIME:") {
            return parse_sntp_time(rest).map(Self::SntpTime);
        }

        if let Some(rest) = line.strip_prefix(b"+CWHOSTNAME:") {
            return Some(Self::Hostname(parse_hostname(rest)));
        }

        if let Some(mut rest) = line.strip_prefix(b"+STA_CONNECTED:") {
            return Some(Self::StaConnected(parse_mac(&mut rest)));
        }

        if let Some(mut rest) = line.strip_prefix(b"+STA_DISCONNECTED:") {
            return Some(Self::StaDisconnected(parse_mac(&mut rest)));
        }

        if let Some(mut rest) = line.strip_prefix(b"+DIST_STA_IP:") {
            let mac = parse_mac(&mut rest);
            return Some(Self::DistStaIp(mac, parse_ip(&mut rest)));
        }

        // Ping reply, e.g. "+12"
        let mut rest = &line[1..];
        if !rest.is_empty() && rest.iter().all(u8::is_ascii_digit) {
            return Some(Self::PingTime(parse_number(&mut rest).max(0) as u32));
        }

        None
    }

    /// Reads the connection number in front of `needle`, e.g. "0,CLOSED"
    fn parse_link_id(resp: &[u8], needle: &[u8]) -> Option<usize> {
        let end = find(resp, needle)?;
        let start = resp[..end]
            .iter()
            .rposition(|c| !c.is_ascii_digit())
            .map(|position| position + 1)
            .unwrap_or(0);

        if start == end {
            return None;
        }

        let mut digits = &resp[start..end];
        Some(parse_number(&mut digits) as usize)
    }
}

/// Position of the first occurrence of `needle`
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
