//! Wire commands sent to the device
use crate::responses::NoResponse;
use crate::types::{HOSTNAME_LEN, SSID_LEN};
use atat::atat_derive::AtatCmd;
use atat::heapless::String;

/// Restarts the device, answered by `ready` after the boot
#[derive(Clone, AtatCmd)]
#[at_cmd("+RST", NoResponse, timeout_ms = 5_000)]
pub struct RestartCommand;

/// Restores the factory settings and restarts the device
#[derive(Clone, AtatCmd)]
#[at_cmd("+RESTORE", NoResponse, timeout_ms = 5_000)]
pub struct RestoreCommand;

/// Disables the command echo
#[derive(Clone, AtatCmd)]
#[at_cmd("E0", NoResponse, timeout_ms = 1_000)]
pub struct EchoOffCommand;

/// Enables the command echo
#[derive(Clone, AtatCmd)]
#[at_cmd("E1", NoResponse, timeout_ms = 1_000)]
pub struct EchoOnCommand;

/// Queries AT and SDK version
#[derive(Clone, AtatCmd)]
#[at_cmd("+GMR", NoResponse, timeout_ms = 1_000)]
pub struct VersionCommand;

/// Sets the WIFI mode
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWMODE", NoResponse, timeout_ms = 1_000)]
pub struct WifiModeCommand {
    /// WIFI mode:
    ///     0: Null mode. Wi-Fi RF will be disabled.
    ///     1: Station mode.
    ///     2: SoftAP mode.
    ///     3: SoftAP+Station mode.
    #[at_arg(position = 0)]
    mode: u8,
}

impl WifiModeCommand {
    pub fn new(mode: u8) -> Self {
        Self { mode }
    }
}

/// Enables the extended system messages (`+LINK_CONN`), current session only
#[derive(Clone, AtatCmd)]
#[at_cmd("+SYSMSG_CUR", NoResponse, timeout_ms = 1_000)]
pub struct SystemMessagesCurrentCommand {
    /// Bit 0: quit transparent transmission message, bit 1: detailed connection messages
    flags: u8,
}

/// Enables the extended system messages on firmware without `_CUR` variant
#[derive(Clone, AtatCmd)]
#[at_cmd("+SYSMSG", NoResponse, timeout_ms = 1_000)]
pub struct SystemMessagesCommand {
    flags: u8,
}

impl SystemMessagesCurrentCommand {
    pub fn link_info() -> Self {
        Self { flags: 3 }
    }
}

impl SystemMessagesCommand {
    pub fn link_info() -> Self {
        Self { flags: 3 }
    }
}

/// Enables/Disables multiple connections
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPMUX", NoResponse, timeout_ms = 1_000)]
pub struct SetMultipleConnectionsCommand {
    /// 0: single connection, 1: multiple connections
    mode: u8,
}

impl SetMultipleConnectionsCommand {
    /// Enables multiple connections
    pub fn multiple() -> Self {
        Self { mode: 1 }
    }
}

/// Selects the fields of `+CWLAP` entries
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWLAPOPT", NoResponse, timeout_ms = 1_000)]
pub struct AccessPointListOptionsCommand {
    /// 1: sort by RSSI
    sort: u8,

    /// Bit mask of printed fields
    mask: u16,
}

impl AccessPointListOptionsCommand {
    /// Sorted by RSSI, all fields
    pub fn all_fields() -> Self {
        Self { sort: 1, mask: 2047 }
    }
}

/// Queries the connection states
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTATUS", NoResponse, timeout_ms = 1_000)]
pub struct StatusCommand;

/// Queries the station addresses
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTA?", NoResponse, timeout_ms = 1_000)]
pub struct StationAddressCommand;

/// Queries the station MAC
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTAMAC?", NoResponse, timeout_ms = 1_000)]
pub struct StationMacCommand;

/// Queries the soft access point addresses
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPAP?", NoResponse, timeout_ms = 1_000)]
pub struct AccessPointAddressCommand;

/// Queries the soft access point MAC
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPAPMAC?", NoResponse, timeout_ms = 1_000)]
pub struct AccessPointMacCommand;

/// Command for joining an access point
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWJAP", NoResponse, timeout_ms = 20_000)]
pub struct AccessPointConnectCommand {
    /// The SSID of the target access point
    #[at_arg(position = 0)]
    ssid: String<SSID_LEN>,

    /// The password/key of the target access point
    #[at_arg(position = 1)]
    password: String<64>,
}

impl AccessPointConnectCommand {
    pub fn new(ssid: String<SSID_LEN>, password: String<64>) -> Self {
        Self { ssid, password }
    }
}

/// Command for joining an access point with a specific BSSID
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWJAP", NoResponse, timeout_ms = 20_000)]
pub struct AccessPointConnectMacCommand {
    #[at_arg(position = 0)]
    ssid: String<SSID_LEN>,

    #[at_arg(position = 1)]
    password: String<64>,

    /// MAC of the access point, e.g. "ca:d7:19:d8:a6:44"
    #[at_arg(position = 2)]
    mac: String<17>,
}

impl AccessPointConnectMacCommand {
    pub fn new(ssid: String<SSID_LEN>, password: String<64>, mac: String<17>) -> Self {
        Self { ssid, password, mac }
    }
}

/// Leaves the access point
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWQAP", NoResponse, timeout_ms = 1_000)]
pub struct AccessPointDisconnectCommand;

/// Enables/Disables joining the stored access point after boot
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWAUTOCONN", NoResponse, timeout_ms = 1_000)]
pub struct AutoConnectCommand {
    enable: u8,
}

impl AutoConnectCommand {
    pub fn new(enable: bool) -> Self {
        Self { enable: enable as u8 }
    }
}

/// Scans for all access points
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWLAP", NoResponse, timeout_ms = 30_000)]
pub struct ListAccessPointsCommand;

/// Scans for access points with the given SSID
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWLAP", NoResponse, timeout_ms = 30_000)]
pub struct FindAccessPointCommand {
    ssid: String<SSID_LEN>,
}

impl FindAccessPointCommand {
    pub fn new(ssid: String<SSID_LEN>) -> Self {
        Self { ssid }
    }
}

/// Sets the max. number of server connections
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSERVERMAXCONN", NoResponse, timeout_ms = 1_000)]
pub struct ServerMaxConnectionsCommand {
    max: u8,
}

impl ServerMaxConnectionsCommand {
    pub fn new(max: u8) -> Self {
        Self { max }
    }
}

/// Enables the server on the given port
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSERVER", NoResponse, timeout_ms = 1_000)]
pub struct ServerEnableCommand {
    mode: u8,
    port: u16,
}

impl ServerEnableCommand {
    pub fn new(port: u16) -> Self {
        Self { mode: 1, port }
    }
}

/// Disables the server
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSERVER", NoResponse, timeout_ms = 1_000)]
pub struct ServerDisableCommand {
    mode: u8,
}

impl ServerDisableCommand {
    pub fn disable() -> Self {
        Self { mode: 0 }
    }
}

/// Sets the idle timeout of server connections in seconds
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTO", NoResponse, timeout_ms = 1_000)]
pub struct ServerTimeoutCommand {
    timeout: u16,
}

impl ServerTimeoutCommand {
    pub fn new(timeout: u16) -> Self {
        Self { timeout }
    }
}

/// Establish TCP Connection, UDP Transmission, or SSL Connection
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSTART", NoResponse, timeout_ms = 60_000, attempts = 1)]
pub struct ConnectCommand {
    /// Socket ID
    link_id: usize,

    /// Connection type, e.g. TCP, UDP or SSL
    connection_type: String<5>,

    /// Remote host name or address
    remote_host: String<HOSTNAME_LEN>,

    /// Remote port
    port: u16,
}

impl ConnectCommand {
    pub fn new(link_id: usize, connection_type: String<5>, remote_host: String<HOSTNAME_LEN>, port: u16) -> Self {
        Self {
            link_id,
            connection_type,
            remote_host,
            port,
        }
    }
}

/// Closes a connection
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPCLOSE", NoResponse, timeout_ms = 5_000)]
pub struct CloseSocketCommand {
    link_id: usize,
}

impl CloseSocketCommand {
    pub fn new(link_id: usize) -> Self {
        Self { link_id }
    }
}

/// Initiates a transmission, the device prompts with `>` for the payload
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSEND", NoResponse, timeout_ms = 1_000)]
pub struct TransmissionPrepareCommand {
    link_id: usize,
    length: usize,
}

impl TransmissionPrepareCommand {
    pub fn new(link_id: usize, length: usize) -> Self {
        Self { link_id, length }
    }
}

/// Initiates a UDP transmission to the given remote
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSEND", NoResponse, timeout_ms = 1_000)]
pub struct TransmissionPrepareToCommand {
    link_id: usize,
    length: usize,
    remote_ip: String<15>,
    remote_port: u16,
}

impl TransmissionPrepareToCommand {
    pub fn new(link_id: usize, length: usize, remote_ip: String<15>, remote_port: u16) -> Self {
        Self {
            link_id,
            length,
            remote_ip,
            remote_port,
        }
    }
}

/// Resolves a host name
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPDOMAIN", NoResponse, timeout_ms = 20_000)]
pub struct ResolveCommand {
    host: String<HOSTNAME_LEN>,
}

impl ResolveCommand {
    pub fn new(host: String<HOSTNAME_LEN>) -> Self {
        Self { host }
    }
}

/// Pings a host
#[derive(Clone, AtatCmd)]
#[at_cmd("+PING", NoResponse, timeout_ms = 20_000)]
pub struct PingCommand {
    host: String<HOSTNAME_LEN>,
}

impl PingCommand {
    pub fn new(host: String<HOSTNAME_LEN>) -> Self {
        Self { host }
    }
}

/// Configures the SNTP client with the default servers
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSNTPCFG", NoResponse, timeout_ms = 1_000)]
pub struct SntpConfigCommand {
    enable: u8,
    timezone: i8,
}

impl SntpConfigCommand {
    pub fn new(enable: bool, timezone: i8) -> Self {
        Self {
            enable: enable as u8,
            timezone,
        }
    }
}

/// Configures the SNTP client with a custom server
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSNTPCFG", NoResponse, timeout_ms = 1_000)]
pub struct SntpServerConfigCommand {
    enable: u8,
    timezone: i8,
    server: String<HOSTNAME_LEN>,
}

impl SntpServerConfigCommand {
    pub fn new(enable: bool, timezone: i8, server: String<HOSTNAME_LEN>) -> Self {
        Self {
            enable: enable as u8,
            timezone,
            server,
        }
    }
}

/// Queries the SNTP time
#[derive(Clone, AtatCmd)]
#[at_cmd("+CIPSNTPTIME?", NoResponse, timeout_ms = 1_000)]
pub struct SntpTimeCommand;

/// Sets the station host name
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWHOSTNAME", NoResponse, timeout_ms = 1_000)]
pub struct SetHostnameCommand {
    hostname: String<HOSTNAME_LEN>,
}

impl SetHostnameCommand {
    pub fn new(hostname: String<HOSTNAME_LEN>) -> Self {
        Self { hostname }
    }
}

/// Queries the station host name
#[derive(Clone, AtatCmd)]
#[at_cmd("+CWHOSTNAME?", NoResponse, timeout_ms = 1_000)]
pub struct GetHostnameCommand;

/// Changes the UART configuration of the current session: 8 data bits, 1 stop bit, no parity and
/// no flow control
#[derive(Clone, AtatCmd)]
#[at_cmd("+UART_CUR", NoResponse, timeout_ms = 1_000)]
pub struct UartCommand {
    baudrate: u32,
    data_bits: u8,
    stop_bits: u8,
    parity: u8,
    flow_control: u8,
}

impl UartCommand {
    pub fn new(baudrate: u32) -> Self {
        Self {
            baudrate,
            data_bits: 8,
            stop_bits: 1,
            parity: 0,
            flow_control: 0,
        }
    }
}
