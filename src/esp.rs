//! Engine handle and command API
//!
//! [Esp::init] creates the engine and starts two threads: the producer sends one command after the
//! other to the device, the processor decodes received bytes and runs timeouts. Every command is
//! available blocking and non-blocking. Blocking calls wait for the final result, non-blocking calls
//! return as soon as the command was queued and report through events.
//!
//! ````no_run
//! use esp_at_host::config::Config;
//! use esp_at_host::{Esp, Link};
//!
//! struct Serial;
//!
//! impl Link for Serial {
//!     fn send(&mut self, data: &[u8]) -> usize {
//!         data.len()
//!     }
//! }
//!
//! let esp = Esp::init(Config::default(), Serial, true).unwrap();
//! esp.sta_join("ssid", "password", None, true).unwrap();
//! assert!(esp.sta_has_ip());
//! ````
//!
//! Received bytes are passed to [Esp::input] by the reader of the serial port. Blocking commands
//! must not be issued from callbacks, as callbacks run on the thread decoding the answers.
use crate::config::{Config, InputMode, WifiMode};
use crate::conn::Conn;
use crate::engine::{Core, Dispatch, Expired, Timeout};
use crate::event::{Arg, Event, EventFn, Flow};
use crate::input::{BufferedSink, ByteSink, DirectSink};
use crate::msg::{ConnStartOp, JoinOp, ListApOp, Msg, Op, ResetOp, ServerOp, Simple, WifiModeOp};
use crate::netconn::Registry;
use crate::sys::{std_duration, Mbox, Sem};
use crate::threads;
use crate::types::{AccessPoint, ConnType, DateTime, IpInfo, Mac, Version, HOSTNAME_LEN};
use crate::Error;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use crossbeam_channel::bounded;
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embassy_time::{Duration, Instant};
use embedded_nal::Ipv4Addr;
use heapless::String;
use log::{trace, warn};

/// User function of [Esp::timeout_add]
pub type TimeoutFn = Arc<dyn Fn(Option<&Arg>) + Send + Sync>;

/// Transmit side of the connection to the device
pub trait Link: Send {
    /// Writes `data` to the device, returns the number of bytes written
    ///
    /// Called under the core lock. Received bytes must not be passed to [Esp::input] from within
    /// this call.
    fn send(&mut self, data: &[u8]) -> usize;

    /// Changes the baudrate of the host side after the device switched to it
    fn set_baudrate(&mut self, _baudrate: u32) {}
}

pub(crate) struct Shared {
    pub(crate) core: CriticalSectionMutex<RefCell<Core>>,

    /// Queue of the producer thread
    pub(crate) producer: Mbox<Box<Msg>>,

    /// Wake-ups of the processor thread
    pub(crate) processor: Mbox<()>,

    /// Held while a message is in flight
    pub(crate) sem_sync: Sem,

    pub(crate) sink: Box<dyn ByteSink>,

    pub(crate) netconn: CriticalSectionMutex<RefCell<Registry>>,

    pub(crate) config: Config,
}

/// Handle of the engine, cheap to clone
#[derive(Clone)]
pub struct Esp {
    pub(crate) shared: Arc<Shared>,
}

impl Esp {
    /// Creates the engine without starting its threads
    pub fn new(config: Config, link: impl Link + 'static) -> Result<Self, Error> {
        let sink: Box<dyn ByteSink> = match config.input_mode {
            InputMode::Buffered(size) => Box::new(BufferedSink::new(size).ok_or(Error::Mem)?),
            InputMode::Direct => Box::new(DirectSink),
        };

        let producer = Mbox::new(config.producer_mbox_size);
        let processor = Mbox::new(config.processor_mbox_size);
        let sem_sync = Sem::new(true);

        let shared = Arc::new_cyclic(|weak| {
            let core = Core::new(config.clone(), Box::new(link), weak.clone(), sem_sync.clone(), processor.clone());
            Shared {
                core: CriticalSectionMutex::new(RefCell::new(core)),
                producer,
                processor,
                sem_sync,
                sink,
                netconn: CriticalSectionMutex::new(RefCell::new(Registry::default())),
                config,
            }
        });

        Ok(Self { shared })
    }

    /// Creates the engine, starts its threads and resets the device if configured
    pub fn init(config: Config, link: impl Link + 'static, blocking: bool) -> Result<Self, Error> {
        let esp = Self::new(config, link)?;
        threads::spawn(&esp)?;
        esp.with_core(|core| core.push_event(Event::InitFinish));

        let config = &esp.shared.config;
        if config.reset_on_init {
            esp.reset_with_delay(config.reset_delay, blocking)?;
        }
        Ok(esp)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Passes bytes received from the device to the engine. Returns the number of accepted bytes.
    pub fn input(&self, data: &[u8]) -> usize {
        self.shared.sink.input(self, data)
    }

    /// Runs `f` under the core lock and dispatches the queued work afterwards
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let (result, pending) = self.shared.core.lock(|core| {
            let mut core = core.borrow_mut();
            let result = f(&mut core);
            (result, core.take_pending())
        });

        self.dispatch(pending);
        result
    }

    fn read_core<R>(&self, f: impl FnOnce(&Core) -> R) -> R {
        self.shared.core.lock(|core| f(&core.borrow()))
    }

    fn dispatch(&self, pending: Vec<Dispatch>) {
        for item in pending {
            match item {
                Dispatch::Global(event) => {
                    trace!("Event {:?}", event);
                    let callbacks = self.read_core(|core| core.callbacks.clone());
                    for cb in callbacks {
                        cb(&event);
                    }
                }
                Dispatch::Callback { cb, event } => {
                    trace!("Event {:?}", event);
                    if cb(&event) == Flow::IgnoreMore {
                        if let Event::ConnRecv { conn, .. } = &event {
                            self.with_core(|core| core.ipd_ignore_more(conn.num()));
                        }
                    }
                }
                Dispatch::Close(conn) => {
                    if let Err(error) = conn.close(false) {
                        warn!("Closing connection {} without callback failed: {:?}", conn.num(), error);
                    }
                }
                Dispatch::Submit(msg) => {
                    if let Err(error) = self.submit(msg, false) {
                        warn!("Queueing internal command failed: {:?}", error);
                    }
                }
            }
        }
    }

    /// Decodes received bytes on the calling thread
    pub(crate) fn process(&self, data: &[u8]) -> usize {
        let mut consumed = 0;
        while consumed < data.len() {
            consumed += self.with_core(|core| core.process(&data[consumed..]));
        }
        consumed
    }

    /// Runs all due timeouts
    pub(crate) fn process_timeouts(&self) {
        loop {
            match self.with_core(|core| core.timeout_due(Instant::now())) {
                Some(Expired::User(func, arg)) => func(arg.as_ref()),
                Some(Expired::Internal) => {}
                None => break,
            }
        }
    }

    /// Queues a message for the producer. A blocking call waits for the result and returns the
    /// finished message.
    pub(crate) fn submit(&self, mut msg: Box<Msg>, blocking: bool) -> Result<Option<Box<Msg>>, Error> {
        if !self.device_present() && !msg.op.is_reset() {
            return Err(Error::NoDevice);
        }

        if !blocking {
            self.shared.producer.put_now(msg)?;
            return Ok(None);
        }

        let (tx, rx) = bounded(1);
        let wait = msg.block_time + msg.block_time + msg.delay;
        msg.done = Some(tx);
        self.shared.producer.put(msg)?;

        let msg = rx.recv_timeout(std_duration(wait)).map_err(|_| Error::Timeout)?;
        msg.res?;
        Ok(Some(msg))
    }

    pub(crate) fn execute(&self, op: Op, blocking: bool) -> Result<Option<Box<Msg>>, Error> {
        self.submit(Msg::new(op, &self.shared.config), blocking)
    }

    /// Runs a single command operation, returns the finished operation of blocking calls
    fn execute_simple(&self, op: Simple, blocking: bool) -> Result<Option<Simple>, Error> {
        Ok(self.execute(Op::Simple(op), blocking)?.and_then(|msg| match msg.op {
            Op::Simple(op) => Some(op),
            _ => None,
        }))
    }

    /// Resets the device and configures it
    pub fn reset(&self, blocking: bool) -> Result<(), Error> {
        self.reset_with_delay(Duration::from_ticks(0), blocking)
    }

    /// Resets the device after `delay`
    pub fn reset_with_delay(&self, delay: Duration, blocking: bool) -> Result<(), Error> {
        let op = Op::Reset(ResetOp {
            restore: false,
            forced: true,
        });
        let msg = Msg::new(op, &self.shared.config).with_delay(delay);
        self.submit(msg, blocking).map(|_| ())
    }

    /// Restores the factory settings, the device is configured again afterwards
    pub fn restore(&self, blocking: bool) -> Result<(), Error> {
        let op = Op::Reset(ResetOp {
            restore: true,
            forced: true,
        });
        self.execute(op, blocking).map(|_| ())
    }

    pub fn set_wifi_mode(&self, mode: WifiMode, blocking: bool) -> Result<(), Error> {
        self.execute(Op::WifiMode(WifiModeOp { mode }), blocking).map(|_| ())
    }

    pub fn wifi_mode(&self) -> WifiMode {
        self.read_core(|core| core.wifi_mode)
    }

    /// Joins an access point, `mac` selects a specific access point
    pub fn sta_join(&self, ssid: &str, password: &str, mac: Option<Mac>, blocking: bool) -> Result<(), Error> {
        if ssid.is_empty() {
            return Err(Error::Par);
        }

        let op = Op::Join(JoinOp {
            ssid: to_string(ssid)?,
            password: to_string(password)?,
            mac,
            error_code: 0,
        });
        self.execute(op, blocking).map(|_| ())
    }

    /// Leaves the access point
    pub fn sta_quit(&self, blocking: bool) -> Result<(), Error> {
        self.execute_simple(Simple::Quit, blocking).map(|_| ())
    }

    /// Enables joining the stored access point after boot
    pub fn sta_autojoin(&self, enable: bool, blocking: bool) -> Result<(), Error> {
        self.execute_simple(Simple::AutoJoin(enable), blocking).map(|_| ())
    }

    /// Scans for access points, optionally only for the given SSID. Blocking calls return up to
    /// `max` entries.
    pub fn sta_list_ap(&self, ssid: Option<&str>, max: usize, blocking: bool) -> Result<Option<Vec<AccessPoint>>, Error> {
        let op = Op::ListAp(ListApOp {
            ssid: ssid.map(to_string).transpose()?,
            max,
            access_points: Vec::new(),
        });

        Ok(self.execute(op, blocking)?.and_then(|msg| match msg.op {
            Op::ListAp(op) => Some(op.access_points),
            _ => None,
        }))
    }

    /// Reads the station addresses from the device
    pub fn sta_getip(&self, blocking: bool) -> Result<Option<IpInfo>, Error> {
        Ok(match self.execute_simple(Simple::StaIp(IpInfo::default()), blocking)? {
            Some(Simple::StaIp(info)) => Some(info),
            _ => None,
        })
    }

    /// Reads the station MAC from the device
    pub fn sta_getmac(&self, blocking: bool) -> Result<Option<Mac>, Error> {
        Ok(match self.execute_simple(Simple::StaMac(Mac::default()), blocking)? {
            Some(Simple::StaMac(mac)) => Some(mac),
            _ => None,
        })
    }

    pub fn ap_getip(&self, blocking: bool) -> Result<Option<IpInfo>, Error> {
        Ok(match self.execute_simple(Simple::ApIp(IpInfo::default()), blocking)? {
            Some(Simple::ApIp(info)) => Some(info),
            _ => None,
        })
    }

    pub fn ap_getmac(&self, blocking: bool) -> Result<Option<Mac>, Error> {
        Ok(match self.execute_simple(Simple::ApMac(Mac::default()), blocking)? {
            Some(Simple::ApMac(mac)) => Some(mac),
            _ => None,
        })
    }

    /// Station got an IP address
    pub fn sta_has_ip(&self) -> bool {
        self.read_core(|core| core.status.got_ip)
    }

    /// Station is joined to an access point
    pub fn sta_is_joined(&self) -> bool {
        self.read_core(|core| core.status.wifi_connected)
    }

    /// Last known station addresses, None without IP
    pub fn sta_ip(&self) -> Option<IpInfo> {
        self.read_core(|core| core.status.got_ip.then_some(core.sta.info))
    }

    /// Last known station MAC
    pub fn sta_mac(&self) -> Mac {
        self.read_core(|core| core.sta.mac)
    }

    /// Last known soft access point addresses
    pub fn ap_ip(&self) -> IpInfo {
        self.read_core(|core| core.ap.info)
    }

    pub fn ap_mac(&self) -> Mac {
        self.read_core(|core| core.ap.mac)
    }

    /// AT firmware version read during the last reset
    pub fn version_at(&self) -> Version {
        self.read_core(|core| core.version_at)
    }

    /// SDK version read during the last reset
    pub fn version_sdk(&self) -> Version {
        self.read_core(|core| core.version_sdk)
    }

    pub fn device_present(&self) -> bool {
        self.read_core(|core| core.status.dev_present)
    }

    /// Enables or disables the server. `cb` receives the events of accepted connections, `timeout`
    /// closes idle server connections after the given seconds.
    pub fn set_server(
        &self,
        enable: bool,
        port: u16,
        max_conns: u8,
        timeout: u16,
        cb: Option<EventFn>,
        blocking: bool,
    ) -> Result<(), Error> {
        if enable && (port == 0 || max_conns == 0) {
            return Err(Error::Par);
        }

        let op = Op::Server(ServerOp {
            enable,
            port,
            max_conns,
            timeout,
            cb,
        });
        self.execute(op, blocking).map(|_| ())
    }

    /// Starts a client connection. All events of the connection go to `cb`. Blocking calls return
    /// the handle if the connection is still active.
    pub fn conn_start(
        &self,
        conn_type: ConnType,
        host: &str,
        port: u16,
        arg: Option<Arg>,
        cb: EventFn,
        blocking: bool,
    ) -> Result<Option<Conn>, Error> {
        if host.is_empty() || port == 0 {
            return Err(Error::Par);
        }

        let op = Op::ConnStart(ConnStartOp {
            conn_type,
            host: to_string(host)?,
            port,
            arg,
            cb: Some(cb),
            num: None,
        });

        Ok(match self.execute(op, blocking)? {
            Some(msg) => match msg.op {
                Op::ConnStart(ConnStartOp { num: Some(num), .. }) => self.read_core(|core| core.started_conn(num)),
                _ => None,
            },
            None => None,
        })
    }

    /// Refreshes the connection table from the device
    pub fn update_status(&self, blocking: bool) -> Result<(), Error> {
        self.execute_simple(Simple::Status, blocking).map(|_| ())
    }

    /// Resolves a host name
    pub fn dns_gethostbyname(&self, host: &str, blocking: bool) -> Result<Option<Ipv4Addr>, Error> {
        let op = Simple::Dns {
            host: to_string(host)?,
            ip: Ipv4Addr::UNSPECIFIED,
        };

        Ok(match self.execute_simple(op, blocking)? {
            Some(Simple::Dns { ip, .. }) => Some(ip),
            _ => None,
        })
    }

    /// Pings a host, blocking calls return the round trip time in ms
    pub fn ping(&self, host: &str, blocking: bool) -> Result<Option<u32>, Error> {
        let op = Simple::Ping {
            host: to_string(host)?,
            time: 0,
        };

        Ok(match self.execute_simple(op, blocking)? {
            Some(Simple::Ping { time, .. }) => Some(time),
            _ => None,
        })
    }

    /// Configures the SNTP client, `server` replaces the default servers
    pub fn sntp_configure(&self, enable: bool, timezone: i8, server: Option<&str>, blocking: bool) -> Result<(), Error> {
        let op = Simple::SntpConfig {
            enable,
            timezone,
            server: server.map(to_string).transpose()?,
        };
        self.execute_simple(op, blocking).map(|_| ())
    }

    pub fn sntp_gettime(&self, blocking: bool) -> Result<Option<DateTime>, Error> {
        Ok(match self.execute_simple(Simple::SntpTime(DateTime::default()), blocking)? {
            Some(Simple::SntpTime(time)) => Some(time),
            _ => None,
        })
    }

    pub fn hostname_set(&self, hostname: &str, blocking: bool) -> Result<(), Error> {
        self.execute_simple(Simple::SetHostname(to_string(hostname)?), blocking)
            .map(|_| ())
    }

    pub fn hostname_get(&self, blocking: bool) -> Result<Option<String<HOSTNAME_LEN>>, Error> {
        Ok(match self.execute_simple(Simple::Hostname(String::new()), blocking)? {
            Some(Simple::Hostname(name)) => Some(name),
            _ => None,
        })
    }

    /// Switches the UART of the device to `baudrate`, the link follows after the device confirmed
    pub fn set_at_baudrate(&self, baudrate: u32, blocking: bool) -> Result<(), Error> {
        if baudrate == 0 {
            return Err(Error::Par);
        }
        self.execute_simple(Simple::Baudrate(baudrate), blocking).map(|_| ())
    }

    /// Notifies the engine about the presence of the device. An absent device closes all
    /// connections and rejects every command except reset, a device becoming present is reset.
    pub fn set_device_present(&self, present: bool, blocking: bool) -> Result<(), Error> {
        let changed = self.with_core(|core| core.set_device_present(present));
        if changed && present {
            self.reset(blocking)?;
        }
        Ok(())
    }

    /// Registers a callback for global events
    pub fn register_callback(&self, cb: EventFn) {
        self.with_core(|core| core.callbacks.push(cb));
    }

    /// Removes a callback registered before, returns false if it was unknown
    pub fn unregister_callback(&self, cb: &EventFn) -> bool {
        self.with_core(|core| {
            let len = core.callbacks.len();
            core.callbacks.retain(|registered| !same_fn(registered, cb));
            core.callbacks.len() != len
        })
    }

    /// Calls `func` with `arg` on the processor thread after `time`
    pub fn timeout_add(&self, time: Duration, func: TimeoutFn, arg: Option<Arg>) {
        self.with_core(|core| core.timeouts.add(Instant::now(), time, Timeout::User { func, arg }));
        self.shared.processor.notify();
    }

    /// Removes the first pending timeout of `func`, returns false if none was pending
    pub fn timeout_remove(&self, func: &TimeoutFn) -> bool {
        self.with_core(|core| {
            core.timeouts
                .remove(|timeout| matches!(timeout, Timeout::User { func: pending, .. } if same_fn(pending, func)))
                .is_some()
        })
    }
}

/// Identity of shared closures, ignoring the vtable part of the pointer
fn same_fn<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn to_string<const N: usize>(value: &str) -> Result<String<N>, Error> {
    String::try_from(value).map_err(|_| Error::Par)
}
