//! Command messages
//!
//! A [Msg] carries one logical operation ([Op]) through the producer thread. An operation may need
//! several wire commands, e.g. joining an access point reads the station address afterwards. Each
//! operation implements [Sequence]: the engine calls [Sequence::step] with the wire command which
//! just finished and the terminal response, and the operation either names the next wire command
//! or finishes with a result.
use crate::config::{Config, WifiMode};
use crate::engine::Core;
use crate::event::{Arg, Event, EventFn};
use crate::types::{AccessPoint, ConnType, DateTime, IpInfo, Mac, HOSTNAME_LEN, SSID_LEN};
use crate::Error;
use alloc::boxed::Box;
use alloc::vec::Vec;
use crossbeam_channel::Sender;
use embassy_time::Duration;
use embedded_nal::Ipv4Addr;
use heapless::String;
use log::debug;

/// Wire command in flight
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Cmd {
    Reset,
    Restore,
    EchoOff,
    EchoOn,
    Version,
    WifiMode,
    SysMsgCur,
    SysMsg,
    Mux,
    ListApOptions,
    Status,
    StaIpGet,
    StaMacGet,
    ApIpGet,
    ApMacGet,
    Join,
    Quit,
    AutoJoin,
    ListAp,
    ServerMaxConn,
    Server,
    ServerTimeout,
    Start,
    Close,
    Send,
    Domain,
    Ping,
    SntpConfig,
    SntpTime,
    HostnameSet,
    HostnameGet,
    Uart,
}

/// Terminal response of a wire command
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Ok,
    Error,
    Ready,
}

impl Verdict {
    pub(crate) fn result(self) -> Result<(), Error> {
        match self {
            Verdict::Ok | Verdict::Ready => Ok(()),
            Verdict::Error => Err(Error::Err),
        }
    }
}

/// Outcome of [Sequence::step]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Initiate the given wire command next
    Continue(Cmd),

    /// Operation finished
    Done(Result<(), Error>),
}

pub(crate) trait Sequence {
    /// First wire command of the operation
    fn first(&self) -> Cmd;

    /// Wire command `done` finished with `verdict`
    fn step(&mut self, _core: &mut Core, _done: Cmd, verdict: Verdict) -> Step {
        Step::Done(verdict.result())
    }
}

/// Reset or restore followed by the configuration of the device
pub(crate) struct ResetOp {
    pub(crate) restore: bool,

    /// False if the engine resets on its own after an unexpected restart
    pub(crate) forced: bool,
}

impl ResetOp {
    fn next(core: &Core, done: Cmd, verdict: Verdict) -> Option<Cmd> {
        let mode = core.wifi_mode;

        match done {
            Cmd::Restore if verdict != Verdict::Ready => None,
            Cmd::Reset | Cmd::Restore if core.config.at_echo => Some(Cmd::EchoOn),
            Cmd::Reset | Cmd::Restore => Some(Cmd::EchoOff),
            Cmd::EchoOn | Cmd::EchoOff => Some(Cmd::Version),
            Cmd::Version => Some(Cmd::WifiMode),
            Cmd::WifiMode => Some(Cmd::SysMsgCur),
            // Older firmware only knows AT+SYSMSG
            Cmd::SysMsgCur if verdict != Verdict::Ok => Some(Cmd::SysMsg),
            Cmd::SysMsgCur | Cmd::SysMsg => Some(Cmd::Mux),
            Cmd::Mux if mode.has_station() => Some(Cmd::ListApOptions),
            Cmd::ListApOptions => Some(Cmd::Status),
            Cmd::Mux | Cmd::Status if mode.has_access_point() => Some(Cmd::ApIpGet),
            Cmd::ApIpGet => Some(Cmd::ApMacGet),
            _ => None,
        }
    }
}

impl Sequence for ResetOp {
    fn first(&self) -> Cmd {
        if self.restore {
            Cmd::Restore
        } else {
            Cmd::Reset
        }
    }

    fn step(&mut self, core: &mut Core, done: Cmd, verdict: Verdict) -> Step {
        if let Some(next) = Self::next(core, done, verdict) {
            return Step::Continue(next);
        }

        core.push_event(Event::ResetFinish { forced: self.forced });
        if self.restore {
            core.push_event(Event::RestoreFinish);
        }
        Step::Done(verdict.result())
    }
}

/// Changes the WiFi mode, access point modes read the soft AP address afterwards
pub(crate) struct WifiModeOp {
    pub(crate) mode: WifiMode,
}

impl Sequence for WifiModeOp {
    fn first(&self) -> Cmd {
        Cmd::WifiMode
    }

    fn step(&mut self, core: &mut Core, done: Cmd, verdict: Verdict) -> Step {
        if verdict != Verdict::Ok {
            return Step::Done(verdict.result());
        }

        match done {
            Cmd::WifiMode => {
                core.wifi_mode = self.mode;
                if self.mode.has_access_point() {
                    return Step::Continue(Cmd::ApIpGet);
                }
            }
            Cmd::ApIpGet => return Step::Continue(Cmd::ApMacGet),
            _ => {}
        }
        Step::Done(Ok(()))
    }
}

/// Joins an access point and reads the station address and MAC
pub(crate) struct JoinOp {
    pub(crate) ssid: String<SSID_LEN>,
    pub(crate) password: String<64>,
    pub(crate) mac: Option<Mac>,

    /// Last `+CWJAP:<n>` error code
    pub(crate) error_code: i32,
}

impl Sequence for JoinOp {
    fn first(&self) -> Cmd {
        Cmd::Join
    }

    fn step(&mut self, core: &mut Core, done: Cmd, verdict: Verdict) -> Step {
        match done {
            Cmd::Join if verdict == Verdict::Ok => Step::Continue(Cmd::StaIpGet),
            Cmd::Join => {
                core.status.wifi_connected = false;
                let error = Error::from_join_code(self.error_code);
                core.push_event(Event::StaJoinAp { status: Err(error) });
                Step::Done(Err(error))
            }
            Cmd::StaIpGet => {
                core.push_event(Event::WifiIpAcquired);
                Step::Continue(Cmd::StaMacGet)
            }
            _ => {
                core.push_event(Event::StaJoinAp { status: Ok(()) });
                Step::Done(verdict.result())
            }
        }
    }
}

/// Scans for access points
pub(crate) struct ListApOp {
    /// Only list access points with this SSID
    pub(crate) ssid: Option<String<SSID_LEN>>,

    /// Max. number of collected entries
    pub(crate) max: usize,

    pub(crate) access_points: Vec<AccessPoint>,
}

impl Sequence for ListApOp {
    fn first(&self) -> Cmd {
        Cmd::ListAp
    }

    fn step(&mut self, core: &mut Core, _done: Cmd, verdict: Verdict) -> Step {
        core.push_event(Event::StaListAp {
            status: verdict.result(),
            access_points: self.access_points.clone(),
        });
        Step::Done(verdict.result())
    }
}

/// Enables or disables the TCP server
pub(crate) struct ServerOp {
    pub(crate) enable: bool,
    pub(crate) port: u16,
    pub(crate) max_conns: u8,

    /// Timeout of inactive server connections in seconds
    pub(crate) timeout: u16,

    /// Callback of accepted connections
    pub(crate) cb: Option<EventFn>,
}

impl Sequence for ServerOp {
    fn first(&self) -> Cmd {
        if self.enable {
            Cmd::ServerMaxConn
        } else {
            Cmd::Server
        }
    }

    fn step(&mut self, core: &mut Core, done: Cmd, verdict: Verdict) -> Step {
        let mut status = verdict.result();

        match done {
            // Not supported by every firmware
            Cmd::ServerMaxConn => return Step::Continue(Cmd::Server),
            Cmd::Server if status.is_ok() && self.enable => {
                core.cb_server = self.cb.clone();
                return Step::Continue(Cmd::ServerTimeout);
            }
            Cmd::Server if status.is_ok() => core.cb_server = None,
            Cmd::ServerTimeout => status = Ok(()),
            _ => {}
        }

        core.push_event(Event::Server {
            status,
            enable: self.enable,
            port: self.port,
        });
        Step::Done(status)
    }
}

/// Starts a client connection
pub(crate) struct ConnStartOp {
    pub(crate) conn_type: ConnType,
    pub(crate) host: String<HOSTNAME_LEN>,
    pub(crate) port: u16,
    pub(crate) arg: Option<Arg>,
    pub(crate) cb: Option<EventFn>,

    /// Slot chosen when `AT+CIPSTART` is initiated
    pub(crate) num: Option<usize>,
}

impl ConnStartOp {
    /// Sends [Event::ConnError] to the callback of the request
    pub(crate) fn report_error(&self, core: &mut Core, error: Error) {
        if let Some(cb) = &self.cb {
            let event = Event::ConnError {
                host: self.host.clone(),
                port: self.port,
                conn_type: self.conn_type,
                arg: self.arg.clone(),
                error,
            };
            core.push_callback(cb.clone(), event);
        }
    }
}

impl Sequence for ConnStartOp {
    fn first(&self) -> Cmd {
        Cmd::Status
    }

    fn step(&mut self, core: &mut Core, done: Cmd, verdict: Verdict) -> Step {
        match done {
            Cmd::Status if verdict == Verdict::Ok => Step::Continue(Cmd::Start),
            Cmd::Start if verdict == Verdict::Error => {
                self.report_error(core, Error::ConnFail);
                Step::Done(Err(Error::ConnFail))
            }
            _ => Step::Done(verdict.result()),
        }
    }
}

/// Sends data in chunks of at most [Config::conn_max_data_len] bytes
pub(crate) struct SendOp {
    pub(crate) num: usize,
    pub(crate) val_id: u32,
    pub(crate) data: Vec<u8>,

    /// Remote of UDP datagrams
    pub(crate) remote: Option<(Ipv4Addr, u16)>,

    /// Offset of the chunk in flight
    pub(crate) ptr: usize,

    /// Length of the chunk in flight
    pub(crate) chunk: usize,

    pub(crate) sent_all: usize,
    pub(crate) tries: usize,

    /// Payload was written after the prompt, waiting for `SEND OK`/`SEND FAIL`
    pub(crate) wait_send_ok_err: bool,
}

impl SendOp {
    pub(crate) fn new(num: usize, val_id: u32, data: Vec<u8>, remote: Option<(Ipv4Addr, u16)>) -> Self {
        Self {
            num,
            val_id,
            data,
            remote,
            ptr: 0,
            chunk: 0,
            sent_all: 0,
            tries: 0,
            wait_send_ok_err: false,
        }
    }

    /// Payload of the chunk in flight
    pub(crate) fn chunk_data(&self) -> &[u8] {
        &self.data[self.ptr..self.ptr + self.chunk]
    }
}

impl Sequence for SendOp {
    fn first(&self) -> Cmd {
        Cmd::Send
    }

    fn step(&mut self, core: &mut Core, _done: Cmd, verdict: Verdict) -> Step {
        // Rejected before the prompt
        if !self.wait_send_ok_err {
            return Step::Done(Err(Error::Err));
        }
        self.wait_send_ok_err = false;

        let active = core.is_conn_valid(self.num, self.val_id);
        if verdict == Verdict::Ok {
            self.sent_all += self.chunk;
            self.ptr += self.chunk;
            self.tries = 0;

            if self.ptr < self.data.len() {
                return Step::Continue(Cmd::Send);
            }

            if active {
                let conn = core.conn_handle(self.num);
                core.push_conn_event(self.num, Event::ConnSent { conn, sent: self.sent_all });
            }
            return Step::Done(Ok(()));
        }

        self.tries += 1;
        if self.tries < core.config.max_send_retries {
            debug!("Retrying send on connection {} ({}. try)", self.num, self.tries + 1);
            return Step::Continue(Cmd::Send);
        }

        if active {
            let conn = core.conn_handle(self.num);
            core.push_conn_event(self.num, Event::ConnSendError { conn, sent: self.sent_all });
        }
        Step::Done(Err(Error::Err))
    }
}

/// Operations consisting of a single wire command
pub(crate) enum Simple {
    Quit,
    AutoJoin(bool),
    StaIp(IpInfo),
    StaMac(Mac),
    ApIp(IpInfo),
    ApMac(Mac),
    Close { num: usize, val_id: u32 },
    Status,
    Dns { host: String<HOSTNAME_LEN>, ip: Ipv4Addr },
    Ping { host: String<HOSTNAME_LEN>, time: u32 },
    SntpConfig {
        enable: bool,
        timezone: i8,
        server: Option<String<HOSTNAME_LEN>>,
    },
    SntpTime(DateTime),
    SetHostname(String<HOSTNAME_LEN>),
    Hostname(String<HOSTNAME_LEN>),
    Baudrate(u32),
}

impl Sequence for Simple {
    fn first(&self) -> Cmd {
        match self {
            Simple::Quit => Cmd::Quit,
            Simple::AutoJoin(_) => Cmd::AutoJoin,
            Simple::StaIp(_) => Cmd::StaIpGet,
            Simple::StaMac(_) => Cmd::StaMacGet,
            Simple::ApIp(_) => Cmd::ApIpGet,
            Simple::ApMac(_) => Cmd::ApMacGet,
            Simple::Close { .. } => Cmd::Close,
            Simple::Status => Cmd::Status,
            Simple::Dns { .. } => Cmd::Domain,
            Simple::Ping { .. } => Cmd::Ping,
            Simple::SntpConfig { .. } => Cmd::SntpConfig,
            Simple::SntpTime(_) => Cmd::SntpTime,
            Simple::SetHostname(_) => Cmd::HostnameSet,
            Simple::Hostname(_) => Cmd::HostnameGet,
            Simple::Baudrate(_) => Cmd::Uart,
        }
    }

    fn step(&mut self, core: &mut Core, _done: Cmd, verdict: Verdict) -> Step {
        let status = verdict.result();

        match self {
            Simple::StaIp(_) => core.push_event(Event::WifiIpAcquired),
            Simple::Dns { host, ip } => core.push_event(Event::DnsHostByName {
                status,
                host: host.clone(),
                ip: *ip,
            }),
            Simple::Ping { host, time } => core.push_event(Event::Ping {
                status,
                host: host.clone(),
                time: *time,
            }),
            Simple::Baudrate(baudrate) if status.is_ok() => core.link.set_baudrate(*baudrate),
            _ => {}
        }
        Step::Done(status)
    }
}

/// Logical operation
pub(crate) enum Op {
    Reset(ResetOp),
    WifiMode(WifiModeOp),
    Join(JoinOp),
    ListAp(ListApOp),
    Server(ServerOp),
    ConnStart(ConnStartOp),
    Send(SendOp),
    Simple(Simple),
}

impl Op {
    pub(crate) fn sequence(&mut self) -> &mut dyn Sequence {
        match self {
            Op::Reset(op) => op,
            Op::WifiMode(op) => op,
            Op::Join(op) => op,
            Op::ListAp(op) => op,
            Op::Server(op) => op,
            Op::ConnStart(op) => op,
            Op::Send(op) => op,
            Op::Simple(op) => op,
        }
    }

    pub(crate) fn is_reset(&self) -> bool {
        matches!(self, Op::Reset(_))
    }

    /// Time the producer waits for the whole operation
    fn block_time(&self, config: &Config) -> Duration {
        let wire = match self {
            Op::Join(_) | Op::Simple(Simple::Dns { .. }) | Op::Simple(Simple::Ping { .. }) => 20_000,
            Op::ListAp(_) => 30_000,
            Op::ConnStart(_) => 60_000,
            _ => 0,
        };
        config.command_timeout + Duration::from_millis(wire)
    }
}

/// Command message owned by the producer thread once submitted
pub(crate) struct Msg {
    pub(crate) op: Op,

    /// Wire command in flight
    pub(crate) cmd: Cmd,

    /// Number of wire commands initiated after the first one
    pub(crate) i: usize,

    pub(crate) res: Result<(), Error>,

    /// Max. time the producer waits for the operation
    pub(crate) block_time: Duration,

    /// Delay before the operation is started
    pub(crate) delay: Duration,

    /// Returns the finished message to a blocking caller
    pub(crate) done: Option<Sender<Box<Msg>>>,
}

impl Msg {
    pub(crate) fn new(mut op: Op, config: &Config) -> Box<Self> {
        let cmd = op.sequence().first();
        Box::new(Self {
            block_time: op.block_time(config),
            op,
            cmd,
            i: 0,
            res: Ok(()),
            delay: Duration::from_ticks(0),
            done: None,
        })
    }

    pub(crate) fn with_delay(mut self: Box<Self>, delay: Duration) -> Box<Self> {
        self.delay = delay;
        self
    }
}
