//! Token parsers for response lines
//!
//! Every parser takes a cursor (`&mut &[u8]`) and advances it past the consumed token including a
//! trailing separator. Malformed tokens yield zero values, the specific line parsers return `None`
//! when a mandatory field is missing.
use crate::types::{AccessPoint, ConnType, DateTime, Ecn, IpInfo, Mac, Version, SSID_LEN};
use core::str::FromStr;
use embedded_nal::Ipv4Addr;
use heapless::String;

/// Header of received payload (`+IPD,<conn>,<len>[,<ip>,<port>]:`)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IpdHeader {
    pub conn: usize,
    pub len: usize,
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Connection state announcement (`+LINK_CONN:`)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkConn {
    /// True if establishing the connection failed
    pub failed: bool,
    pub num: usize,
    pub conn_type: ConnType,
    /// True if the device accepted the connection as server
    pub is_server: bool,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    pub local_port: u16,
}

/// One `+CIPSTATUS:` entry
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConnStatus {
    pub num: usize,
    pub conn_type: ConnType,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
    pub local_port: u16,
    /// True if the device is the client side
    pub client: bool,
}

/// Field of an `+CIPSTA:`/`+CIPAP:` response
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IpField {
    Ip,
    Gateway,
    Netmask,
}

impl IpField {
    /// Writes the address into the matching field of `info`
    pub(crate) fn apply(self, info: &mut IpInfo, address: Ipv4Addr) {
        match self {
            IpField::Ip => info.ip = address,
            IpField::Gateway => info.gateway = address,
            IpField::Netmask => info.netmask = address,
        }
    }
}

fn peek(s: &[u8]) -> Option<u8> {
    s.first().copied()
}

/// Consumes `byte` if it is the next one
fn eat(s: &mut &[u8], byte: u8) -> bool {
    if peek(s) == Some(byte) {
        *s = &s[1..];
        return true;
    }
    false
}

/// Parses a decimal number, optionally quoted and signed
pub fn parse_number(s: &mut &[u8]) -> i32 {
    for prefix in [b'"', b',', b'"', b'/', b':', b'+'] {
        eat(s, prefix);
    }

    let minus = eat(s, b'-');
    let mut value: i32 = 0;
    while let Some(digit) = peek(s).filter(u8::is_ascii_digit) {
        value = value.wrapping_mul(10).wrapping_add((digit - b'0') as i32);
        *s = &s[1..];
    }

    eat(s, b'"');
    eat(s, b',');
    if minus {
        value.wrapping_neg()
    } else {
        value
    }
}

/// Parses a hexadecimal number
pub fn parse_hex(s: &mut &[u8]) -> u32 {
    for prefix in [b'"', b',', b':'] {
        eat(s, prefix);
    }

    let mut value: u32 = 0;
    while let Some(nibble) = peek(s).and_then(base16::decode_byte) {
        value = (value << 4) | nibble as u32;
        *s = &s[1..];
    }

    eat(s, b',');
    value
}

/// Parses a quoted or plain string and returns its content
pub fn parse_string<'a>(s: &mut &'a [u8]) -> &'a [u8] {
    eat(s, b',');

    let value = if eat(s, b'"') {
        let end = s.iter().position(|c| *c == b'"').unwrap_or(s.len());
        let value = &s[..end];
        *s = &s[end..];
        eat(s, b'"');
        value
    } else {
        let end = s.iter().position(|c| matches!(c, b',' | b'\r' | b'\n')).unwrap_or(s.len());
        let value = &s[..end];
        *s = &s[end..];
        value
    };

    eat(s, b',');
    value
}

/// Parses a string into a fixed size [String], truncating it to the capacity
pub(crate) fn parse_string_into<const N: usize>(s: &mut &[u8]) -> String<N> {
    let value = parse_string(s);
    let mut result = String::new();
    for c in core::str::from_utf8(value).unwrap_or_default().chars() {
        if result.push(c).is_err() {
            break;
        }
    }
    result
}

/// Parses a dotted IPv4 address, optionally quoted
pub fn parse_ip(s: &mut &[u8]) -> Ipv4Addr {
    eat(s, b',');
    let quoted = eat(s, b'"');

    let mut octets = [0u8; 4];
    for (i, octet) in octets.iter_mut().enumerate() {
        let mut value: u32 = 0;
        while let Some(digit) = peek(s).filter(u8::is_ascii_digit) {
            value = value.saturating_mul(10).saturating_add((digit - b'0') as u32);
            *s = &s[1..];
        }
        *octet = value.min(255) as u8;
        if i < 3 && !eat(s, b'.') {
            break;
        }
    }

    if quoted {
        eat(s, b'"');
    }
    eat(s, b',');
    Ipv4Addr::from(octets)
}

/// Parses a MAC address of six hex bytes, colon separated or not, optionally quoted
pub fn parse_mac(s: &mut &[u8]) -> Mac {
    eat(s, b',');
    let quoted = eat(s, b'"');

    let mut mac = [0u8; 6];
    for byte in mac.iter_mut() {
        for _ in 0..2 {
            match peek(s).and_then(base16::decode_byte) {
                Some(nibble) => {
                    *byte = (*byte << 4) | nibble;
                    *s = &s[1..];
                }
                None => break,
            }
        }
        eat(s, b':');
    }

    if quoted {
        eat(s, b'"');
    }
    eat(s, b',');
    Mac(mac)
}

/// Parses a port number
pub fn parse_port(s: &mut &[u8]) -> u16 {
    parse_number(s).clamp(0, u16::MAX as i32) as u16
}

/// Parses the part after `+IPD,`
pub fn parse_ipd(mut s: &[u8]) -> Option<IpdHeader> {
    let s = &mut s;
    if !peek(s)?.is_ascii_digit() {
        return None;
    }

    let conn = parse_number(s).max(0) as usize;
    let len = parse_number(s).max(0) as usize;

    let mut header = IpdHeader {
        conn,
        len,
        ip: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    if matches!(peek(s), Some(c) if c.is_ascii_digit() || c == b'"') {
        header.ip = parse_ip(s);
        header.port = parse_port(s);
    }

    Some(header)
}

/// Parses the part after `+LINK_CONN:`
pub fn parse_link_conn(mut s: &[u8]) -> Option<LinkConn> {
    let s = &mut s;
    if !peek(s)?.is_ascii_digit() {
        return None;
    }

    let failed = parse_number(s) != 0;
    let num = parse_number(s).max(0) as usize;
    let conn_type = ConnType::from_bytes(parse_string(s))?;
    let is_server = parse_number(s) != 0;
    let remote_ip = parse_ip(s);
    let remote_port = parse_port(s);
    let local_port = parse_port(s);

    Some(LinkConn {
        failed,
        num,
        conn_type,
        is_server,
        remote_ip,
        remote_port,
        local_port,
    })
}

/// Parses the part after `+CIPSTATUS:`
pub fn parse_cipstatus(mut s: &[u8]) -> Option<ConnStatus> {
    let s = &mut s;
    if !peek(s)?.is_ascii_digit() {
        return None;
    }

    let num = parse_number(s).max(0) as usize;
    let conn_type = ConnType::from_bytes(parse_string(s))?;
    let remote_ip = parse_ip(s);
    let remote_port = parse_port(s);
    let local_port = parse_port(s);
    let client = parse_number(s) == 0;

    Some(ConnStatus {
        num,
        conn_type,
        remote_ip,
        remote_port,
        local_port,
        client,
    })
}

/// Parses the part after `+CWLAP:`
pub fn parse_cwlap(mut s: &[u8]) -> Option<AccessPoint> {
    let s = &mut s;
    if !eat(s, b'(') {
        return None;
    }

    let ecn = Ecn::from(parse_number(s));
    let ssid = parse_string_into::<SSID_LEN>(s);
    let rssi = parse_number(s) as i16;
    let mac = parse_mac(s);
    let channel = parse_number(s) as u8;
    let offset = parse_number(s) as i8;
    let calibration = parse_number(s) as u8;

    Some(AccessPoint {
        ecn,
        ssid,
        rssi,
        mac,
        channel,
        offset,
        calibration,
    })
}

/// Parses the part after `+CIPSTA`/`+CIPAP` with an optional `_CUR` suffix. Stored defaults
/// (`_DEF`) are not the active settings and yield None.
pub fn parse_cipsta_cipap(mut s: &[u8]) -> Option<(IpField, Ipv4Addr)> {
    let s = &mut s;
    if !strip_current(s) {
        return None;
    }

    if !eat(s, b':') {
        return None;
    }

    let field = if s.starts_with(b"ip:") {
        IpField::Ip
    } else if s.starts_with(b"gateway:") {
        IpField::Gateway
    } else if s.starts_with(b"netmask:") {
        IpField::Netmask
    } else {
        return None;
    };

    let separator = s.iter().position(|c| *c == b':')?;
    *s = &s[separator + 1..];
    Some((field, parse_ip(s)))
}

/// Parses the part after `+CIPSTAMAC`/`+CIPAPMAC` with an optional `_CUR` suffix, `_DEF` yields
/// None
pub fn parse_mac_response(mut s: &[u8]) -> Option<Mac> {
    let s = &mut s;
    if !strip_current(s) {
        return None;
    }

    if !eat(s, b':') {
        return None;
    }
    Some(parse_mac(s))
}

/// Skips a `_CUR` suffix, false for `_DEF`
fn strip_current(s: &mut &[u8]) -> bool {
    if s.starts_with(b"_DEF") {
        return false;
    }
    if s.starts_with(b"_CUR") {
        *s = &s[4..];
    }
    true
}

/// Parses firmware versions like `1.6.2.0(Apr 13 2018 11:10:59)`
pub fn parse_version(mut s: &[u8]) -> Version {
    let s = &mut s;
    let major = parse_number(s) as u8;
    eat(s, b'.');
    let minor = parse_number(s) as u8;
    eat(s, b'.');
    let patch = parse_number(s) as u8;

    Version { major, minor, patch }
}

/// Parses the part after `+CIPSNTPTIME:`, e.g. `Thu Aug 04 14:48:05 2016`
pub fn parse_sntp_time(s: &[u8]) -> Option<DateTime> {
    const DAYS: [&[u8]; 7] = [b"Mon", b"Tue", b"Wed", b"Thu", b"Fri", b"Sat", b"Sun"];
    const MONTHS: [&[u8]; 12] = [
        b"Jan", b"Feb", b"Mar", b"Apr", b"May", b"Jun", b"Jul", b"Aug", b"Sep", b"Oct", b"Nov", b"Dec",
    ];

    let mut fields = s.split(|c| *c == b' ').filter(|field| !field.is_empty());
    let day_name = fields.next()?;
    let day = DAYS.iter().position(|day| *day == day_name)? as u8 + 1;
    let month_name = fields.next()?;
    let month = MONTHS.iter().position(|month| *month == month_name)? as u8 + 1;

    let mut date = fields.next()?;
    let mut time = fields.next()?;
    let mut year = fields.next()?;

    let date = parse_number(&mut date) as u8;
    let hours = parse_number(&mut time) as u8;
    let minutes = parse_number(&mut time) as u8;
    let seconds = parse_number(&mut time) as u8;
    let year = parse_number(&mut year) as u16;

    Some(DateTime {
        day,
        date,
        month,
        year,
        hours,
        minutes,
        seconds,
    })
}

/// Parses the part after `+CWHOSTNAME:`
pub fn parse_hostname<const N: usize>(mut s: &[u8]) -> String<N> {
    let value = parse_string(&mut s);
    core::str::from_utf8(value)
        .ok()
        .and_then(|value| String::from_str(value).ok())
        .unwrap_or_default()
}
