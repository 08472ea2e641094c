//! Events delivered to registered callbacks
//!
//! Global events go to every callback registered with [Esp::register_callback](crate::esp::Esp::register_callback).
//! Connection events (`Conn*`) go to the callback of the connection only. Callbacks run on the
//! thread which decoded the event, outside of the core lock, and borrow the event for the duration
//! of the call only. A callback must not block on a command, as the engine waits for it to return.
use crate::conn::Conn;
use crate::pbuf::Pbuf;
use crate::types::{AccessPoint, ConnType, Mac, HOSTNAME_LEN};
use crate::Error;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt::{Debug, Formatter};
use embedded_nal::Ipv4Addr;
use heapless::String;

/// User argument attached to a connection
pub type Arg = Arc<dyn Any + Send + Sync>;

/// Event callback
pub type EventFn = Arc<dyn Fn(&Event) -> Flow + Send + Sync>;

/// Return value of a callback
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Continue,

    /// Skips the remaining payload of the current `+IPD` frame, only evaluated for [Event::ConnRecv]
    IgnoreMore,
}

#[derive(Clone)]
pub enum Event {
    /// Device was reset, `forced` is true if the reset was requested
    Reset { forced: bool },

    /// Reset sequence finished
    ResetFinish { forced: bool },

    /// Restore sequence finished
    RestoreFinish,

    /// Engine threads are running
    InitFinish,

    /// Presence of the device changed
    DevicePresent { present: bool },

    WifiConnected,
    WifiGotIp,
    WifiDisconnected,

    /// Station address information was read
    WifiIpAcquired,

    /// Join finished
    StaJoinAp { status: Result<(), Error> },

    /// Access point scan finished
    StaListAp {
        status: Result<(), Error>,
        access_points: Vec<AccessPoint>,
    },

    /// Station joined the soft access point
    ApConnectedSta { mac: Mac },

    /// Station left the soft access point
    ApDisconnectedSta { mac: Mac },

    /// Soft access point assigned an IP address to a station
    ApIpSta { mac: Mac, ip: Ipv4Addr },

    /// Server was enabled or disabled
    Server {
        status: Result<(), Error>,
        enable: bool,
        port: u16,
    },

    DnsHostByName {
        status: Result<(), Error>,
        host: String<HOSTNAME_LEN>,
        ip: Ipv4Addr,
    },

    Ping {
        status: Result<(), Error>,
        host: String<HOSTNAME_LEN>,
        time: u32,
    },

    /// Connection became active, `forced` is true for client connections
    ConnActive { conn: Conn, client: bool, forced: bool },

    /// Connection could not be started
    ConnError {
        host: String<HOSTNAME_LEN>,
        port: u16,
        conn_type: ConnType,
        arg: Option<Arg>,
        error: Error,
    },

    /// Connection was closed. The handle is already stale when the event is delivered, `arg` is
    /// the argument the connection had.
    ConnClosed {
        conn: Conn,
        client: bool,
        forced: bool,
        arg: Option<Arg>,
    },

    /// Payload received, keep the buffer by cloning it
    ConnRecv { conn: Conn, buf: Pbuf },

    /// All data of a send request was transmitted
    ConnSent { conn: Conn, sent: usize },

    /// Send request failed after the retries, `sent` bytes were transmitted
    ConnSendError { conn: Conn, sent: usize },

    /// Periodic poll of an active connection
    ConnPoll { conn: Conn },
}

/// Discriminant of [Event]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Reset,
    ResetFinish,
    RestoreFinish,
    InitFinish,
    DevicePresent,
    WifiConnected,
    WifiGotIp,
    WifiDisconnected,
    WifiIpAcquired,
    StaJoinAp,
    StaListAp,
    ApConnectedSta,
    ApDisconnectedSta,
    ApIpSta,
    Server,
    DnsHostByName,
    Ping,
    ConnActive,
    ConnError,
    ConnClosed,
    ConnRecv,
    ConnSent,
    ConnSendError,
    ConnPoll,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Reset { .. } => EventKind::Reset,
            Event::ResetFinish { .. } => EventKind::ResetFinish,
            Event::RestoreFinish => EventKind::RestoreFinish,
            Event::InitFinish => EventKind::InitFinish,
            Event::DevicePresent { .. } => EventKind::DevicePresent,
            Event::WifiConnected => EventKind::WifiConnected,
            Event::WifiGotIp => EventKind::WifiGotIp,
            Event::WifiDisconnected => EventKind::WifiDisconnected,
            Event::WifiIpAcquired => EventKind::WifiIpAcquired,
            Event::StaJoinAp { .. } => EventKind::StaJoinAp,
            Event::StaListAp { .. } => EventKind::StaListAp,
            Event::ApConnectedSta { .. } => EventKind::ApConnectedSta,
            Event::ApDisconnectedSta { .. } => EventKind::ApDisconnectedSta,
            Event::ApIpSta { .. } => EventKind::ApIpSta,
            Event::Server { .. } => EventKind::Server,
            Event::DnsHostByName { .. } => EventKind::DnsHostByName,
            Event::Ping { .. } => EventKind::Ping,
            Event::ConnActive { .. } => EventKind::ConnActive,
            Event::ConnError { .. } => EventKind::ConnError,
            Event::ConnClosed { .. } => EventKind::ConnClosed,
            Event::ConnRecv { .. } => EventKind::ConnRecv,
            Event::ConnSent { .. } => EventKind::ConnSent,
            Event::ConnSendError { .. } => EventKind::ConnSendError,
            Event::ConnPoll { .. } => EventKind::ConnPoll,
        }
    }

    /// Connection the event refers to
    pub fn conn(&self) -> Option<&Conn> {
        match self {
            Event::ConnActive { conn, .. }
            | Event::ConnClosed { conn, .. }
            | Event::ConnRecv { conn, .. }
            | Event::ConnSent { conn, .. }
            | Event::ConnSendError { conn, .. }
            | Event::ConnPoll { conn } => Some(conn),
            _ => None,
        }
    }
}

impl Debug for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self.conn() {
            Some(conn) => write!(f, "{:?}({})", self.kind(), conn.num()),
            None => write!(f, "{:?}", self.kind()),
        }
    }
}

/// Wraps a closure into an [EventFn]
pub fn callback<F>(f: F) -> EventFn
where
    F: Fn(&Event) -> Flow + Send + Sync + 'static,
{
    Arc::new(f)
}
