//! Protocol engine
//!
//! [Core] holds the whole device state and is only accessed under the core lock. It decodes the
//! received byte stream (lines, the `\n> ` send prompt and raw `+IPD` payload), applies every line
//! to the device state in the context of the command in flight and initiates wire commands.
//!
//! Callbacks are never invoked while the core is borrowed. Everything which has to reach user code
//! is queued as [Dispatch] and delivered by [Esp::with_core](crate::esp::Esp) after the lock was
//! released. Decoding pauses as soon as something is queued, so a callback returning
//! [Flow::IgnoreMore](crate::event::Flow::IgnoreMore) takes effect before further payload is
//! consumed.
use crate::commands::{
    AccessPointAddressCommand, AccessPointConnectCommand, AccessPointConnectMacCommand, AccessPointDisconnectCommand,
    AccessPointListOptionsCommand, AccessPointMacCommand, AutoConnectCommand, CloseSocketCommand, ConnectCommand,
    EchoOffCommand, EchoOnCommand, FindAccessPointCommand, GetHostnameCommand, ListAccessPointsCommand,
    PingCommand, ResolveCommand, RestartCommand, RestoreCommand, ServerDisableCommand, ServerEnableCommand,
    ServerMaxConnectionsCommand, ServerTimeoutCommand, SetHostnameCommand, SetMultipleConnectionsCommand,
    SntpConfigCommand, SntpServerConfigCommand, SntpTimeCommand, StationAddressCommand, StationMacCommand,
    StatusCommand, SystemMessagesCommand, SystemMessagesCurrentCommand, TransmissionPrepareCommand,
    TransmissionPrepareToCommand, UartCommand, VersionCommand, WifiModeCommand,
};
use crate::config::{Config, WifiMode};
use crate::conn::{Conn, ConnSlot};
use crate::esp::{Link, Shared, TimeoutFn};
use crate::event::{Arg, Event, EventFn};
use crate::msg::{Cmd, ConnStartOp, Msg, Op, ResetOp, SendOp, Simple, Step, Verdict};
use crate::parser::{ConnStatus, IpdHeader, LinkConn};
use crate::pbuf::Pbuf;
use crate::sys::{Mbox, Sem};
use crate::timeout::TimeoutQueue;
use crate::types::{ConnType, IpInfo, Mac, Version};
use crate::unicode::{Utf8Decoder, Utf8State};
use crate::urc::Line;
use crate::Error;
use alloc::boxed::Box;
use alloc::sync::Weak;
use alloc::vec::Vec;
use atat::{AtatCmd, AtatUrc};
use core::fmt::Write;
use embassy_time::Instant;
use embedded_nal::Ipv4Addr;
use heapless::String;
use log::{debug, trace, warn};

/// Size of the line accumulator
const LINE_LEN: usize = 256;

/// Work queued under the core lock and executed after it was released
pub(crate) enum Dispatch {
    /// Event for all registered callbacks
    Global(Event),

    /// Event for one callback
    Callback { cb: EventFn, event: Event },

    /// Non-blocking close of a connection without callback
    Close(Conn),

    /// Non-blocking submission of a message
    Submit(Box<Msg>),
}

/// Entry of the timeout queue
pub(crate) enum Timeout {
    /// Periodic poll of a connection
    ConnPoll { num: usize, val_id: u32 },

    /// Timeout added by [Esp::timeout_add](crate::esp::Esp::timeout_add)
    User { func: TimeoutFn, arg: Option<Arg> },
}

/// Result of [Core::timeout_due]
pub(crate) enum Expired {
    /// Handled by the engine
    Internal,

    /// User function, to be called outside the lock
    User(TimeoutFn, Option<Arg>),
}

/// Device status flags
#[derive(Copy, Clone, Debug)]
pub(crate) struct Status {
    pub(crate) dev_present: bool,
    pub(crate) wifi_connected: bool,
    pub(crate) got_ip: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            dev_present: true,
            wifi_connected: false,
            got_ip: false,
        }
    }
}

/// Cached addresses of the station or soft access point
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Interface {
    pub(crate) info: IpInfo,
    pub(crate) mac: Mac,
}

/// Receive state of raw `+IPD` payload
struct Ipd {
    /// Payload bytes are expected
    read: bool,

    /// Payload is skipped
    ignore: bool,

    conn: usize,

    /// Payload bytes still expected
    rem_len: usize,

    ip: Ipv4Addr,
    port: u16,

    /// Buffer being filled
    buff: Option<Pbuf>,

    /// Write offset in `buff`
    buff_ptr: usize,
}

impl Default for Ipd {
    fn default() -> Self {
        Self {
            read: false,
            ignore: false,
            conn: 0,
            rem_len: 0,
            ip: Ipv4Addr::UNSPECIFIED,
            port: 0,
            buff: None,
            buff_ptr: 0,
        }
    }
}

pub(crate) struct Core {
    pub(crate) config: Config,
    pub(crate) link: Box<dyn Link>,

    shared: Weak<Shared>,

    /// Released when the message in flight finished
    sem_sync: Sem,

    /// Wakes the processor thread when the timeout queue changed
    processor: Mbox<()>,

    /// Message in flight
    msg: Option<Box<Msg>>,

    /// Finished message, picked up by the producer
    done_msg: Option<Box<Msg>>,

    pub(crate) conns: Vec<ConnSlot>,

    /// Active mask reported by `AT+CIPSTATUS`
    active_conns: u32,

    pub(crate) status: Status,
    pub(crate) sta: Interface,
    pub(crate) ap: Interface,
    pub(crate) version_at: Version,
    pub(crate) version_sdk: Version,
    pub(crate) wifi_mode: WifiMode,

    /// Callback of connections accepted by the server
    pub(crate) cb_server: Option<EventFn>,

    /// Global callbacks
    pub(crate) callbacks: Vec<EventFn>,

    pub(crate) timeouts: TimeoutQueue<Timeout>,

    pending: Vec<Dispatch>,

    pub(crate) line: heapless::Vec<u8, LINE_LEN>,

    /// Last two received bytes
    prev: [u8; 2],

    utf8: Utf8Decoder,
    ipd: Ipd,
}

impl Core {
    pub(crate) fn new(config: Config, link: Box<dyn Link>, shared: Weak<Shared>, sem_sync: Sem, processor: Mbox<()>) -> Self {
        Self {
            conns: (0..config.max_conns).map(ConnSlot::new).collect(),
            wifi_mode: config.wifi_mode,
            config,
            link,
            shared,
            sem_sync,
            processor,
            msg: None,
            done_msg: None,
            active_conns: 0,
            status: Status::default(),
            sta: Interface::default(),
            ap: Interface::default(),
            version_at: Version::default(),
            version_sdk: Version::default(),
            cb_server: None,
            callbacks: Vec::new(),
            timeouts: TimeoutQueue::new(Instant::now()),
            pending: Vec::new(),
            line: heapless::Vec::new(),
            prev: [0; 2],
            utf8: Utf8Decoder::default(),
            ipd: Ipd::default(),
        }
    }

    /// Takes the work queued since the last call
    pub(crate) fn take_pending(&mut self) -> Vec<Dispatch> {
        core::mem::take(&mut self.pending)
    }

    pub(crate) fn push_event(&mut self, event: Event) {
        self.pending.push(Dispatch::Global(event));
    }

    pub(crate) fn push_callback(&mut self, cb: EventFn, event: Event) {
        self.pending.push(Dispatch::Callback { cb, event });
    }

    fn push_submit(&mut self, msg: Box<Msg>) {
        self.pending.push(Dispatch::Submit(msg));
    }

    /// Routes a connection event to the callback of the slot. Slots in closing only receive the
    /// close event, slots without callback get closed.
    pub(crate) fn push_conn_event(&mut self, num: usize, event: Event) {
        let Some(slot) = self.conns.get(num) else {
            return;
        };

        let closed = matches!(event, Event::ConnClosed { .. });
        if slot.in_closing && !closed {
            return;
        }

        match &slot.cb {
            Some(cb) => self.pending.push(Dispatch::Callback { cb: cb.clone(), event }),
            None if !closed => {
                if let Some(conn) = event.conn() {
                    self.pending.push(Dispatch::Close(conn.clone()));
                }
            }
            None => {}
        }
    }

    /// Handle of the current generation of slot `num`
    pub(crate) fn conn_handle(&self, num: usize) -> Conn {
        Conn {
            shared: self.shared.clone(),
            num,
            val_id: self.conns.get(num).map_or(0, |slot| slot.val_id),
        }
    }

    /// Slot `num` is active and still in generation `val_id`
    pub(crate) fn is_conn_valid(&self, num: usize, val_id: u32) -> bool {
        self.conns
            .get(num)
            .map_or(false, |slot| slot.active && slot.val_id == val_id)
    }

    /// Slot of the handle if the handle is not stale
    pub(crate) fn slot_mut(&mut self, conn: &Conn) -> Option<&mut ConnSlot> {
        self.conns
            .get_mut(conn.num)
            .filter(|slot| slot.active && slot.val_id == conn.val_id)
    }

    /// Handle of a client connection started in slot `num`
    pub(crate) fn started_conn(&self, num: usize) -> Option<Conn> {
        let slot = self.conns.get(num)?;
        if !slot.active || !slot.client {
            return None;
        }
        Some(self.conn_handle(num))
    }

    fn current_cmd(&self) -> Option<Cmd> {
        self.msg.as_ref().map(|msg| msg.cmd)
    }

    /// Operation in flight if its current wire command is `cmd`
    fn current_op(&mut self, cmd: Cmd) -> Option<&mut Op> {
        self.msg.as_mut().filter(|msg| msg.cmd == cmd).map(|msg| &mut msg.op)
    }

    /// Initiates the first wire command of `msg`. Returns false if nothing was sent, the message
    /// is finished in this case.
    pub(crate) fn start(&mut self, mut msg: Box<Msg>) -> bool {
        match self.initiate(&mut msg) {
            Ok(()) => {
                self.msg = Some(msg);
                true
            }
            Err(error) => {
                debug!("Command {:?} not started: {:?}", msg.cmd, error);
                msg.res = Err(error);
                self.done_msg = Some(msg);
                false
            }
        }
    }

    /// Takes the finished message. A message still in flight is aborted with a timeout.
    pub(crate) fn finish(&mut self) -> Option<Box<Msg>> {
        if let Some(msg) = self.done_msg.take() {
            return Some(msg);
        }

        let mut msg = self.msg.take()?;
        warn!("Command {:?} timed out", msg.cmd);
        msg.res = Err(Error::Timeout);
        Some(msg)
    }

    /// Feeds the sequence of the message in flight with a terminal response
    fn process_terminal(&mut self, verdict: Verdict) {
        let Some(mut msg) = self.msg.take() else {
            return;
        };

        let done = msg.cmd;
        let mut step = msg.op.sequence().step(self, done, verdict);

        loop {
            match step {
                Step::Continue(next) => {
                    msg.cmd = next;
                    msg.i += 1;

                    match self.initiate(&mut msg) {
                        Ok(()) => {
                            self.msg = Some(msg);
                            return;
                        }
                        Err(error) => {
                            debug!("Command {:?} not started: {:?}", next, error);
                            step = Step::Done(Err(error));
                        }
                    }
                }
                Step::Done(res) => {
                    msg.res = res;
                    self.done_msg = Some(msg);
                    self.sem_sync.release();
                    return;
                }
            }
        }
    }

    /// Sends the current wire command of `msg`
    fn initiate(&mut self, msg: &mut Msg) -> Result<(), Error> {
        match (msg.cmd, &mut msg.op) {
            (Cmd::Reset, _) => self.send_command(&RestartCommand),
            (Cmd::Restore, _) => self.send_command(&RestoreCommand),
            (Cmd::EchoOff, _) => self.send_command(&EchoOffCommand),
            (Cmd::EchoOn, _) => self.send_command(&EchoOnCommand),
            (Cmd::Version, _) => self.send_command(&VersionCommand),
            (Cmd::WifiMode, Op::WifiMode(op)) => self.send_command(&WifiModeCommand::new(op.mode.code())),
            (Cmd::WifiMode, _) => self.send_command(&WifiModeCommand::new(self.wifi_mode.code())),
            (Cmd::SysMsgCur, _) => self.send_command(&SystemMessagesCurrentCommand::link_info()),
            (Cmd::SysMsg, _) => self.send_command(&SystemMessagesCommand::link_info()),
            (Cmd::Mux, _) => self.send_command(&SetMultipleConnectionsCommand::multiple()),
            (Cmd::ListApOptions, _) => self.send_command(&AccessPointListOptionsCommand::all_fields()),
            (Cmd::Status, _) => {
                self.active_conns = 0;
                self.send_command(&StatusCommand)
            }
            (Cmd::StaIpGet, _) => self.send_command(&StationAddressCommand),
            (Cmd::StaMacGet, _) => self.send_command(&StationMacCommand),
            (Cmd::ApIpGet, _) => self.send_command(&AccessPointAddressCommand),
            (Cmd::ApMacGet, _) => self.send_command(&AccessPointMacCommand),
            (Cmd::Join, Op::Join(op)) => {
                op.error_code = 0;
                match op.mac {
                    Some(mac) => {
                        let mut text = String::<17>::new();
                        write!(text, "{}", mac).map_err(|_| Error::Par)?;
                        let command = AccessPointConnectMacCommand::new(op.ssid.clone(), op.password.clone(), text);
                        self.send_command(&command)
                    }
                    None => self.send_command(&AccessPointConnectCommand::new(op.ssid.clone(), op.password.clone())),
                }
            }
            (Cmd::Quit, _) => self.send_command(&AccessPointDisconnectCommand),
            (Cmd::AutoJoin, Op::Simple(Simple::AutoJoin(enable))) => self.send_command(&AutoConnectCommand::new(*enable)),
            (Cmd::ListAp, Op::ListAp(op)) => match &op.ssid {
                Some(ssid) => self.send_command(&FindAccessPointCommand::new(ssid.clone())),
                None => self.send_command(&ListAccessPointsCommand),
            },
            (Cmd::ServerMaxConn, Op::Server(op)) => {
                let max = (op.max_conns as usize).min(self.config.max_conns) as u8;
                self.send_command(&ServerMaxConnectionsCommand::new(max))
            }
            (Cmd::Server, Op::Server(op)) if op.enable => self.send_command(&ServerEnableCommand::new(op.port)),
            (Cmd::Server, Op::Server(_)) => self.send_command(&ServerDisableCommand::disable()),
            (Cmd::ServerTimeout, Op::Server(op)) => self.send_command(&ServerTimeoutCommand::new(op.timeout)),
            (Cmd::Start, Op::ConnStart(op)) => self.initiate_start(op),
            (Cmd::Close, Op::Simple(Simple::Close { num, val_id })) => {
                if !self.is_conn_valid(*num, *val_id) {
                    return Err(Error::Err);
                }
                self.send_command(&CloseSocketCommand::new(*num))
            }
            (Cmd::Send, Op::Send(op)) => self.initiate_send(op),
            (Cmd::Domain, Op::Simple(Simple::Dns { host, .. })) => self.send_command(&ResolveCommand::new(host.clone())),
            (Cmd::Ping, Op::Simple(Simple::Ping { host, .. })) => self.send_command(&PingCommand::new(host.clone())),
            (
                Cmd::SntpConfig,
                Op::Simple(Simple::SntpConfig {
                    enable,
                    timezone,
                    server,
                }),
            ) => match server {
                Some(server) => self.send_command(&SntpServerConfigCommand::new(*enable, *timezone, server.clone())),
                None => self.send_command(&SntpConfigCommand::new(*enable, *timezone)),
            },
            (Cmd::SntpTime, _) => self.send_command(&SntpTimeCommand),
            (Cmd::HostnameSet, Op::Simple(Simple::SetHostname(name))) => {
                self.send_command(&SetHostnameCommand::new(name.clone()))
            }
            (Cmd::HostnameGet, _) => self.send_command(&GetHostnameCommand),
            (Cmd::Uart, Op::Simple(Simple::Baudrate(baudrate))) => self.send_command(&UartCommand::new(*baudrate)),
            (cmd, _) => {
                warn!("Command {:?} does not belong to the operation", cmd);
                Err(Error::Par)
            }
        }
    }

    /// Picks a free slot and sends `AT+CIPSTART`
    fn initiate_start(&mut self, op: &mut ConnStartOp) -> Result<(), Error> {
        if !self.status.got_ip {
            op.report_error(self, Error::NoIp);
            return Err(Error::NoIp);
        }

        let free = (0..self.conns.len())
            .rev()
            .find(|num| !self.conns[*num].active || self.active_conns & (1 << *num) == 0);

        let Some(num) = free else {
            op.report_error(self, Error::NoFreeConn);
            return Err(Error::NoFreeConn);
        };

        op.num = Some(num);
        let conn_type = String::try_from(op.conn_type.as_str()).map_err(|_| Error::Par)?;
        self.send_command(&ConnectCommand::new(num, conn_type, op.host.clone(), op.port))
    }

    /// Announces the next chunk of a send request
    fn initiate_send(&mut self, op: &mut SendOp) -> Result<(), Error> {
        if !self.is_conn_valid(op.num, op.val_id) {
            return Err(Error::Closed);
        }

        op.chunk = (op.data.len() - op.ptr).min(self.config.conn_max_data_len);
        op.wait_send_ok_err = false;

        let udp = self.conns[op.num].conn_type == ConnType::Udp;
        match op.remote {
            Some((ip, port)) if udp => {
                let mut text = String::<15>::new();
                write!(text, "{}", ip).map_err(|_| Error::Par)?;
                self.send_command(&TransmissionPrepareToCommand::new(op.num, op.chunk, text, port))
            }
            _ => self.send_command(&TransmissionPrepareCommand::new(op.num, op.chunk)),
        }
    }

    /// Serializes and transmits a wire command
    fn send_command<C: AtatCmd<LEN>, const LEN: usize>(&mut self, command: &C) -> Result<(), Error> {
        let bytes = command.as_bytes();
        trace!("Sending {:?}", core::str::from_utf8(&bytes).unwrap_or("<binary>"));

        if self.link.send(&bytes) != bytes.len() {
            warn!("Link accepted only part of the command");
            return Err(Error::Err);
        }
        Ok(())
    }

    /// Decodes received bytes, returns the number of consumed bytes. Stops early when work was
    /// queued for dispatch.
    pub(crate) fn process(&mut self, data: &[u8]) -> usize {
        let mut consumed = 0;

        while consumed < data.len() && self.pending.is_empty() {
            if self.ipd.read {
                consumed += self.process_ipd(&data[consumed..]);
            } else {
                self.process_byte(data[consumed]);
                consumed += 1;
            }
        }

        consumed
    }

    fn process_byte(&mut self, ch: u8) {
        match ch {
            b'\r' | b'\n' | 32..=126 => {
                self.utf8 = Utf8Decoder::default();
                self.process_char(ch);
            }
            0x80..=0xFF => match self.utf8.decode(ch) {
                Utf8State::Complete => {
                    let mut bytes = [0u8; 4];
                    let len = self.utf8.bytes().len();
                    bytes[..len].copy_from_slice(self.utf8.bytes());

                    for byte in &bytes[..len] {
                        self.push_line(*byte);
                    }
                }
                Utf8State::Invalid => {
                    warn!("Invalid UTF-8 sequence, line discarded");
                    self.utf8 = Utf8Decoder::default();
                    self.line.clear();
                }
                Utf8State::InProgress => {}
            },
            _ => {
                self.utf8 = Utf8Decoder::default();
                self.line.clear();
            }
        }

        self.prev = [self.prev[1], ch];
    }

    fn push_line(&mut self, ch: u8) {
        if self.line.push(ch).is_err() {
            warn!("Line buffer overflow, byte dropped");
        }
    }

    fn process_char(&mut self, ch: u8) {
        self.push_line(ch);

        if ch == b'\n' {
            self.process_line();
            self.line.clear();
            return;
        }

        if ch == b' ' && self.prev == [b'\n', b'>'] && self.current_cmd() == Some(Cmd::Send) {
            self.line.clear();
            self.send_prompt_data();
            return;
        }

        if ch == b':' && self.line.len() > 4 && self.line.starts_with(b"+IPD") {
            self.process_line();
            self.line.clear();
        }
    }

    /// Writes the chunk of the send in flight after the `> ` prompt
    fn send_prompt_data(&mut self) {
        let Some(msg) = self.msg.as_mut() else {
            return;
        };

        if let (Cmd::Send, Op::Send(op)) = (msg.cmd, &mut msg.op) {
            if op.wait_send_ok_err {
                return;
            }

            let data = op.chunk_data();
            trace!("Sending {} payload bytes on connection {}", data.len(), op.num);
            if self.link.send(data) != data.len() {
                warn!("Link accepted only part of the payload");
            }
            op.wait_send_ok_err = true;
        }
    }

    fn process_ipd(&mut self, data: &[u8]) -> usize {
        if !self.ipd.ignore && self.ipd.buff.is_none() {
            self.ipd_allocate();
        }

        let mut len = self.ipd.rem_len.min(data.len());
        match self.ipd.buff.as_ref() {
            Some(buff) if !self.ipd.ignore => {
                len = len.min(buff.len() - self.ipd.buff_ptr);
                if buff.take(&data[..len], self.ipd.buff_ptr).is_err() {
                    warn!("Payload exceeds the receive buffer");
                }
                self.ipd.buff_ptr += len;
                self.ipd.rem_len -= len;

                if self.ipd.buff_ptr == buff.len() || self.ipd.rem_len == 0 {
                    self.ipd_deliver();
                }
            }
            _ => self.ipd.rem_len -= len,
        }

        if self.ipd.rem_len == 0 {
            self.ipd.read = false;
            self.ipd.ignore = false;
            self.ipd.buff = None;
            self.line.clear();
        }

        match len {
            0 => {}
            1 => self.prev = [self.prev[1], data[0]],
            _ => self.prev = [data[len - 2], data[len - 1]],
        }
        len
    }

    /// Allocates the next receive buffer if the connection accepts data
    fn ipd_allocate(&mut self) {
        let usable = self
            .conns
            .get(self.ipd.conn)
            .map_or(false, |slot| slot.active && !slot.in_closing);

        if !usable {
            self.ipd.ignore = true;
            return;
        }

        let size = self.ipd.rem_len.min(self.config.ipd_max_buff_size.max(1));
        let buff = Pbuf::new(size);
        buff.set_ip(self.ipd.ip, self.ipd.port);
        self.ipd.buff = Some(buff);
        self.ipd.buff_ptr = 0;
    }

    /// Hands the filled buffer to the connection
    fn ipd_deliver(&mut self) {
        let Some(buf) = self.ipd.buff.take() else {
            return;
        };
        self.ipd.buff_ptr = 0;

        let num = self.ipd.conn;
        if let Some(slot) = self.conns.get_mut(num) {
            slot.total_recved += buf.tot_len();
        }

        let conn = self.conn_handle(num);
        self.push_conn_event(num, Event::ConnRecv { conn, buf });
    }

    /// Skips the rest of the current payload of connection `num`
    pub(crate) fn ipd_ignore_more(&mut self, num: usize) {
        if self.ipd.read && self.ipd.conn == num {
            debug!("Ignoring rest of payload on connection {}", num);
            self.ipd.ignore = true;
            self.ipd.buff = None;
        }
    }

    fn ipd_start(&mut self, header: IpdHeader) {
        let slot = self.conns.get(header.conn);
        let usable = slot.map_or(false, |slot| slot.active && !slot.in_closing);

        let (ip, port) = match slot {
            Some(slot) if header.ip.is_unspecified() => (slot.remote_ip, slot.remote_port),
            _ => (header.ip, header.port),
        };

        self.ipd = Ipd {
            read: header.len > 0,
            ignore: !usable,
            conn: header.conn,
            rem_len: header.len,
            ip,
            port,
            buff: None,
            buff_ptr: 0,
        };
    }

    fn process_line(&mut self) {
        let Some(line) = Line::parse(&self.line) else {
            return;
        };
        trace!("Received {:?}", line);

        let cur = self.current_cmd();
        match line {
            Line::Ok => match cur {
                Some(Cmd::Reset | Cmd::Restore | Cmd::Send) | None => {}
                Some(Cmd::Status) => {
                    self.apply_active_mask();
                    self.process_terminal(Verdict::Ok);
                }
                Some(_) => self.process_terminal(Verdict::Ok),
            },
            Line::Error => self.process_terminal(Verdict::Error),
            Line::SendOk if self.waiting_send_result() => self.process_terminal(Verdict::Ok),
            Line::SendFail if self.waiting_send_result() => self.process_terminal(Verdict::Error),
            Line::Ready => {
                let forced = matches!(cur, Some(Cmd::Reset | Cmd::Restore));
                self.reset_everything(forced);
                self.push_event(Event::Reset { forced });
                self.process_terminal(if forced { Verdict::Ready } else { Verdict::Error });
            }
            Line::Ipd(header) => self.ipd_start(header),
            Line::LinkConn(link) => self.link_conn(link),
            Line::Closed(num) | Line::ConnectFail(num) => {
                if self.conns.get(num).map_or(false, |slot| slot.active) {
                    let forced = self.closing(num);
                    self.release_conn(num, forced);
                }
            }
            Line::WifiConnected => {
                self.status.wifi_connected = true;
                self.push_event(Event::WifiConnected);
                self.query_station_ip(cur);
            }
            Line::WifiGotIp => {
                self.status.got_ip = true;
                self.push_event(Event::WifiGotIp);
                self.query_station_ip(cur);
            }
            Line::WifiDisconnected => {
                self.status.wifi_connected = false;
                self.status.got_ip = false;
                self.push_event(Event::WifiDisconnected);
            }
            Line::StaIp(field, ip) if cur == Some(Cmd::StaIpGet) => {
                field.apply(&mut self.sta.info, ip);
                if let Some(Op::Simple(Simple::StaIp(info))) = self.current_op(Cmd::StaIpGet) {
                    field.apply(info, ip);
                }
            }
            Line::ApIp(field, ip) if cur == Some(Cmd::ApIpGet) => {
                field.apply(&mut self.ap.info, ip);
                if let Some(Op::Simple(Simple::ApIp(info))) = self.current_op(Cmd::ApIpGet) {
                    field.apply(info, ip);
                }
            }
            Line::StaMac(mac) if cur == Some(Cmd::StaMacGet) => {
                self.sta.mac = mac;
                if let Some(Op::Simple(Simple::StaMac(value))) = self.current_op(Cmd::StaMacGet) {
                    *value = mac;
                }
            }
            Line::ApMac(mac) if cur == Some(Cmd::ApMacGet) => {
                self.ap.mac = mac;
                if let Some(Op::Simple(Simple::ApMac(value))) = self.current_op(Cmd::ApMacGet) {
                    *value = mac;
                }
            }
            Line::AccessPoint(access_point) => {
                if let Some(Op::ListAp(op)) = self.current_op(Cmd::ListAp) {
                    if op.access_points.len() < op.max {
                        op.access_points.push(access_point);
                    }
                }
            }
            Line::JoinStatus(code) => {
                if let Some(Op::Join(op)) = self.current_op(Cmd::Join) {
                    op.error_code = code;
                }
            }
            Line::Domain(address) => {
                if let Some(Op::Simple(Simple::Dns { ip, .. })) = self.current_op(Cmd::Domain) {
                    *ip = address;
                }
            }
            Line::PingTime(value) => {
                if let Some(Op::Simple(Simple::Ping { time, .. })) = self.current_op(Cmd::Ping) {
                    *time = value;
                }
            }
            Line::SntpTime(value) => {
                if let Some(Op::Simple(Simple::SntpTime(time))) = self.current_op(Cmd::SntpTime) {
                    *time = value;
                }
            }
            Line::Hostname(value) => {
                if let Some(Op::Simple(Simple::Hostname(name))) = self.current_op(Cmd::HostnameGet) {
                    *name = value;
                }
            }
            Line::AtVersion(version) if cur == Some(Cmd::Version) => self.version_at = version,
            Line::SdkVersion(version) if cur == Some(Cmd::Version) => self.version_sdk = version,
            Line::Status(status) if cur == Some(Cmd::Status) => self.apply_status(status),
            Line::StaConnected(mac) => self.push_event(Event::ApConnectedSta { mac }),
            Line::StaDisconnected(mac) => self.push_event(Event::ApDisconnectedSta { mac }),
            Line::DistStaIp(mac, ip) => self.push_event(Event::ApIpSta { mac, ip }),
            _ => {}
        }
    }

    /// Payload of the send in flight was written, waiting for `SEND OK`/`SEND FAIL`
    fn waiting_send_result(&self) -> bool {
        match self.msg.as_deref() {
            Some(Msg {
                cmd: Cmd::Send,
                op: Op::Send(op),
                ..
            }) => op.wait_send_ok_err,
            _ => false,
        }
    }

    /// Close of slot `num` was requested by the command in flight
    fn closing(&self, num: usize) -> bool {
        match self.msg.as_deref() {
            Some(Msg {
                cmd: Cmd::Close,
                op: Op::Simple(Simple::Close { num: closing, .. }),
                ..
            }) => *closing == num,
            _ => false,
        }
    }

    /// Refreshes the station address after an automatic join
    fn query_station_ip(&mut self, cur: Option<Cmd>) {
        if cur != Some(Cmd::Join) {
            let msg = Msg::new(Op::Simple(Simple::StaIp(IpInfo::default())), &self.config);
            self.push_submit(msg);
        }
    }

    fn link_conn(&mut self, link: LinkConn) {
        let num = link.num;
        let Some(active) = self.conns.get(num).map(|slot| slot.active) else {
            return;
        };

        if link.failed {
            if active {
                let forced = self.closing(num);
                self.release_conn(num, forced);
            }
            return;
        }

        if active {
            return;
        }

        let started = if link.is_server { None } else { self.start_callback(num) };
        let cb_server = self.cb_server.clone();

        let Some(slot) = self.conns.get_mut(num) else {
            return;
        };
        slot.activate(&link);
        match started {
            Some((cb, arg)) => {
                slot.cb = cb;
                slot.arg = arg;
            }
            None => {
                slot.cb = cb_server;
                slot.conn_type = ConnType::Tcp;
            }
        }

        let client = slot.client;
        debug!("Connection {} active (client: {})", num, client);

        let conn = self.conn_handle(num);
        self.push_conn_event(
            num,
            Event::ConnActive {
                conn,
                client,
                forced: client,
            },
        );
        self.arm_poll(num);
    }

    /// Callback and argument of the `AT+CIPSTART` in flight for slot `num`
    fn start_callback(&mut self, num: usize) -> Option<(Option<EventFn>, Option<Arg>)> {
        match self.current_op(Cmd::Start)? {
            Op::ConnStart(op) if op.num == Some(num) => Some((op.cb.clone(), op.arg.clone())),
            _ => None,
        }
    }

    fn apply_status(&mut self, status: ConnStatus) {
        if status.num < 32 {
            self.active_conns |= 1 << status.num;
        }

        if let Some(slot) = self.conns.get_mut(status.num) {
            slot.conn_type = status.conn_type;
            slot.remote_ip = status.remote_ip;
            slot.remote_port = status.remote_port;
            slot.local_port = status.local_port;
            slot.client = status.client;
        }
    }

    /// Closes active slots the device did not report in `AT+CIPSTATUS`
    fn apply_active_mask(&mut self) {
        for num in 0..self.conns.len() {
            if self.conns[num].active && self.active_conns & (1 << num) == 0 {
                self.release_conn(num, false);
            }
        }
    }

    /// Marks slot `num` closed and sends the close event
    fn release_conn(&mut self, num: usize, forced: bool) {
        let conn = self.conn_handle(num);
        let Some(slot) = self.conns.get_mut(num) else {
            return;
        };

        let client = slot.client;
        let arg = slot.arg.clone();
        slot.release();
        debug!("Connection {} closed (forced: {})", num, forced);

        self.push_conn_event(
            num,
            Event::ConnClosed {
                conn,
                client,
                forced,
                arg,
            },
        );
        self.timeouts
            .remove(|timeout| matches!(timeout, Timeout::ConnPoll { num: poll, .. } if *poll == num));

        if let Some(slot) = self.conns.get_mut(num) {
            slot.cb = None;
            slot.arg = None;
        }
    }

    /// Puts the engine into the state of a freshly started device
    pub(crate) fn reset_everything(&mut self, forced: bool) {
        for num in 0..self.conns.len() {
            if self.conns[num].active {
                self.release_conn(num, forced);
            }
        }

        self.ipd = Ipd::default();
        self.status.got_ip = false;
        if self.status.wifi_connected {
            self.push_event(Event::WifiDisconnected);
        }
        self.status.wifi_connected = false;

        if !forced {
            let op = Op::Reset(ResetOp {
                restore: false,
                forced: false,
            });
            let msg = Msg::new(op, &self.config);
            self.push_submit(msg);
        }
    }

    /// Updates the presence flag, returns false if it did not change. The reset of a device that
    /// became present is issued by the caller.
    pub(crate) fn set_device_present(&mut self, present: bool) -> bool {
        if self.status.dev_present == present {
            return false;
        }
        self.status.dev_present = present;

        if !present {
            self.reset_everything(true);
        }

        self.push_event(Event::DevicePresent { present });
        true
    }

    fn arm_poll(&mut self, num: usize) {
        let Some(val_id) = self.conns.get(num).map(|slot| slot.val_id) else {
            return;
        };

        self.timeouts
            .add(Instant::now(), self.config.conn_poll_interval, Timeout::ConnPoll { num, val_id });
        self.processor.notify();
    }

    /// Pops one due timeout. Connection polls are handled here, user functions are returned.
    pub(crate) fn timeout_due(&mut self, now: Instant) -> Option<Expired> {
        match self.timeouts.pop_due(now)? {
            Timeout::ConnPoll { num, val_id } => {
                if self.is_conn_valid(num, val_id) {
                    let conn = self.conn_handle(num);
                    self.push_conn_event(num, Event::ConnPoll { conn });
                    self.timeouts
                        .add(now, self.config.conn_poll_interval, Timeout::ConnPoll { num, val_id });
                }
                Some(Expired::Internal)
            }
            Timeout::User { func, arg } => Some(Expired::User(func, arg)),
        }
    }
}
