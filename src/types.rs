//! Value types shared by the command API, events and parsers
use core::fmt::{Display, Formatter};
use embedded_nal::Ipv4Addr;
use heapless::String;

/// Max. length of an SSID
pub const SSID_LEN: usize = 32;

/// Max. length of a host name
pub const HOSTNAME_LEN: usize = 64;

/// MAC address
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Mac(pub [u8; 6]);

impl Display for Mac {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            let hex = base16::encode_byte_l(*byte);
            f.write_str(core::str::from_utf8(&hex).map_err(|_| core::fmt::Error)?)?;
        }
        Ok(())
    }
}

/// Connection type
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnType {
    Tcp,
    Udp,
    Ssl,
}

impl ConnType {
    /// Type as used by `AT+CIPSTART`
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ConnType::Tcp => "TCP",
            ConnType::Udp => "UDP",
            ConnType::Ssl => "SSL",
        }
    }

    pub(crate) fn from_bytes(value: &[u8]) -> Option<Self> {
        match value {
            b"TCP" => Some(ConnType::Tcp),
            b"UDP" => Some(ConnType::Udp),
            b"SSL" => Some(ConnType::Ssl),
            _ => None,
        }
    }
}

/// Address information of the station or soft access point
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IpInfo {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl Default for IpInfo {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Firmware version as reported by `AT+GMR`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Encryption of an access point
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ecn {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa2Enterprise,
    Unknown,
}

impl From<i32> for Ecn {
    fn from(value: i32) -> Self {
        match value {
            0 => Ecn::Open,
            1 => Ecn::Wep,
            2 => Ecn::WpaPsk,
            3 => Ecn::Wpa2Psk,
            4 => Ecn::WpaWpa2Psk,
            5 => Ecn::Wpa2Enterprise,
            _ => Ecn::Unknown,
        }
    }
}

/// One entry of an access point scan (`+CWLAP`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPoint {
    pub ecn: Ecn,
    pub ssid: String<SSID_LEN>,
    pub rssi: i16,
    pub mac: Mac,
    pub channel: u8,
    pub offset: i8,
    pub calibration: u8,
}

/// Date and time from the SNTP client (`+CIPSNTPTIME`)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DateTime {
    /// 1 = Monday .. 7 = Sunday
    pub day: u8,
    pub date: u8,
    /// 1 = January .. 12 = December
    pub month: u8,
    pub year: u16,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}
