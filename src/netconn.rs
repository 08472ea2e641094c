//! # Sequential connection API
//!
//! [Netconn] wraps the event driven connection API into blocking calls for application threads.
//! Received buffers are queued per handle, accepted server connections are queued on the
//! listening handle.
//!
//! ````no_run
//! use esp_at_host::netconn::Netconn;
//! use esp_at_host::types::ConnType;
//! # fn example(esp: &esp_at_host::Esp) -> Result<(), esp_at_host::Error> {
//!
//! let client = Netconn::new(esp, ConnType::Tcp)?;
//! client.connect("example.com", 80)?;
//! client.write(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")?;
//! client.flush()?;
//!
//! let response = client.receive()?;
//! assert!(response.tot_len() > 0);
//! client.close()?;
//! # Ok(())
//! # }
//! ````
//!
//! Handles implement [embedded_io::Read] and [embedded_io::Write]. A closed connection reads as end
//! of stream.
use crate::conn::Conn;
use crate::esp::{Esp, Shared};
use crate::event::{callback, Arg, Event, EventFn, Flow};
use crate::pbuf::Pbuf;
use crate::sys::Mbox;
use crate::types::ConnType;
use crate::Error;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
#[cfg(feature = "netconn-receive-timeout")]
use embassy_time::Duration;
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embedded_nal::Ipv4Addr;
use log::{debug, warn};

/// Timeout of idle server connections in seconds
const SERVER_TIMEOUT: u16 = 100;

/// Netconn state shared by all handles of the engine
#[derive(Default)]
pub(crate) struct Registry {
    /// Global event hook is registered
    hook: bool,

    /// Handle accepting server connections
    listen: Option<Weak<NetconnInner>>,

    /// Every handle created and not yet deleted
    handles: Vec<Weak<NetconnInner>>,
}

enum Accepted {
    Conn(Netconn),

    /// WiFi connection dropped
    Closed,

    /// Device is gone
    NotPresent,
}

enum Received {
    Data(Pbuf),
    Closed,
}

struct State {
    conn: Option<Conn>,
    listen_port: u16,

    /// Number of queued receive buffers
    rcv_packets: usize,

    /// Write buffer of [Netconn::write]
    buff: Option<Vec<u8>>,

    /// Connection closed, nothing more to receive
    closed: bool,

    #[cfg(feature = "netconn-receive-timeout")]
    receive_timeout: Option<Duration>,

    /// Partly read buffer and read offset of [embedded_io::Read]
    pending: Option<(Pbuf, usize)>,
}

pub(crate) struct NetconnInner {
    shared: Weak<Shared>,
    conn_type: ConnType,
    state: CriticalSectionMutex<RefCell<State>>,
    accept: Mbox<Accepted>,
    receive: Mbox<Received>,
}

impl NetconnInner {
    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }
}

/// Blocking connection handle
#[derive(Clone)]
pub struct Netconn {
    inner: Arc<NetconnInner>,
}

impl Netconn {
    pub fn new(esp: &Esp, conn_type: ConnType) -> Result<Self, Error> {
        let register = esp
            .shared
            .netconn
            .lock(|registry| !core::mem::replace(&mut registry.borrow_mut().hook, true));

        if register {
            esp.register_callback(global_hook(Arc::downgrade(&esp.shared)));
        }

        Ok(Self::create(esp, conn_type, None))
    }

    fn create(esp: &Esp, conn_type: ConnType, conn: Option<Conn>) -> Self {
        let config = &esp.shared.config;
        let state = State {
            conn,
            listen_port: 0,
            rcv_packets: 0,
            buff: None,
            closed: false,
            #[cfg(feature = "netconn-receive-timeout")]
            receive_timeout: None,
            pending: None,
        };

        let netconn = Self {
            inner: Arc::new(NetconnInner {
                shared: Arc::downgrade(&esp.shared),
                conn_type,
                state: CriticalSectionMutex::new(RefCell::new(state)),
                accept: Mbox::new(config.netconn_accept_queue_len),
                receive: Mbox::new(config.netconn_receive_queue_len),
            }),
        };

        esp.shared.netconn.lock(|registry| {
            let mut registry = registry.borrow_mut();
            registry.handles.retain(|handle| handle.strong_count() > 0);
            registry.handles.push(Arc::downgrade(&netconn.inner));
        });
        netconn
    }

    /// Handles of the engine that were not deleted yet
    pub fn handles(esp: &Esp) -> Vec<Netconn> {
        esp.shared.netconn.lock(|registry| {
            registry
                .borrow()
                .handles
                .iter()
                .filter_map(Weak::upgrade)
                .map(|inner| Netconn { inner })
                .collect()
        })
    }

    /// Both handles refer to the same connection object
    pub fn ptr_eq(&self, other: &Netconn) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Connects to a remote host, blocks until the connection is active
    pub fn connect(&self, host: &str, port: u16) -> Result<(), Error> {
        let esp = self.esp()?;
        let arg: Arg = self.inner.clone();
        let cb = conn_callback(Arc::downgrade(&esp.shared));

        let conn = esp
            .conn_start(self.inner.conn_type, host, port, Some(arg), cb, true)?
            .ok_or(Error::Closed)?;

        self.inner.with_state(|state| {
            state.conn = Some(conn);
            state.closed = false;
        });
        Ok(())
    }

    /// Enables the server on the given port
    pub fn bind(&self, port: u16) -> Result<(), Error> {
        let esp = self.esp()?;
        let max_conns = esp.shared.config.max_conns.min(u8::MAX as usize) as u8;
        let cb = conn_callback(Arc::downgrade(&esp.shared));

        esp.set_server(true, port, max_conns, SERVER_TIMEOUT, Some(cb), true)?;
        self.inner.with_state(|state| state.listen_port = port);
        Ok(())
    }

    /// Makes this handle the receiver of accepted connections
    pub fn listen(&self) -> Result<(), Error> {
        if self.inner.conn_type != ConnType::Tcp {
            return Err(Error::Par);
        }

        let esp = self.esp()?;
        esp.shared
            .netconn
            .lock(|registry| registry.borrow_mut().listen = Some(Arc::downgrade(&self.inner)));
        Ok(())
    }

    /// Waits for the next accepted connection
    pub fn accept(&self) -> Result<Netconn, Error> {
        let esp = self.esp()?;
        if !self.is_listener(&esp) {
            return Err(Error::Par);
        }

        match self.inner.accept.get(None)? {
            Accepted::Conn(netconn) => Ok(netconn),
            Accepted::Closed => {
                self.clear_listener(&esp);
                Err(Error::WifiNotConnected)
            }
            Accepted::NotPresent => {
                self.clear_listener(&esp);
                Err(Error::NoDevice)
            }
        }
    }

    /// Buffers `data`, full buffers are sent blocking
    pub fn write(&self, data: &[u8]) -> Result<(), Error> {
        let conn = self.conn().ok_or(Error::Closed)?;
        let max = self.esp()?.shared.config.conn_max_data_len;
        let mut data = data;

        let full = self.inner.with_state(|state| {
            let buff = state.buff.as_mut()?;
            let count = (max - buff.len().min(max)).min(data.len());
            buff.extend_from_slice(&data[..count]);
            data = &data[count..];

            if buff.len() >= max {
                return state.buff.take();
            }
            None
        });

        if let Some(full) = full {
            conn.send(&full, true)?;
        }

        // Larger parts bypass the buffer
        let direct = data.len() - data.len() % max;
        if direct > 0 {
            conn.send(&data[..direct], true)?;
            data = &data[direct..];
        }

        if !data.is_empty() {
            self.inner.with_state(|state| {
                state
                    .buff
                    .get_or_insert_with(|| Vec::with_capacity(max))
                    .extend_from_slice(data)
            });
        }
        Ok(())
    }

    /// Sends buffered data
    pub fn flush(&self) -> Result<(), Error> {
        let Some(buff) = self.inner.with_state(|state| state.buff.take()) else {
            return Ok(());
        };

        if buff.is_empty() {
            return Ok(());
        }
        self.conn().ok_or(Error::Closed)?.send(&buff, true).map(|_| ())
    }

    /// Sends a datagram on a UDP connection
    pub fn send(&self, data: &[u8]) -> Result<(), Error> {
        self.udp_conn()?.send(data, true).map(|_| ())
    }

    /// Sends a datagram to the given remote on a UDP connection
    pub fn sendto(&self, ip: Ipv4Addr, port: u16, data: &[u8]) -> Result<(), Error> {
        self.udp_conn()?.sendto(ip, port, data, true).map(|_| ())
    }

    /// Waits for received data. Fails with [Error::Closed] once the connection was closed and all
    /// data was read.
    pub fn receive(&self) -> Result<Pbuf, Error> {
        if self.inner.with_state(|state| state.closed) {
            return Err(Error::Closed);
        }

        #[cfg(feature = "netconn-receive-timeout")]
        let timeout = self.inner.with_state(|state| state.receive_timeout);
        #[cfg(not(feature = "netconn-receive-timeout"))]
        let timeout = None;

        match self.inner.receive.get(timeout)? {
            Received::Data(pbuf) => {
                self.inner
                    .with_state(|state| state.rcv_packets = state.rcv_packets.saturating_sub(1));
                Ok(pbuf)
            }
            Received::Closed => {
                debug!("Netconn closed by remote");
                self.inner.with_state(|state| state.closed = true);
                Err(Error::Closed)
            }
        }
    }

    /// Closes the connection. A listening handle disables the server.
    pub fn close(&self) -> Result<(), Error> {
        let esp = self.esp()?;
        if let Err(error) = self.flush() {
            debug!("Flush on close failed: {:?}", error);
        }

        let conn = self.inner.with_state(|state| {
            state.closed = true;
            state.pending = None;
            state.conn.take()
        });
        if let Some(conn) = conn {
            if let Err(error) = conn.close(true) {
                warn!("Closing connection {} failed: {:?}", conn.num(), error);
            }
        }

        if self.is_listener(&esp) {
            self.clear_listener(&esp);
            esp.set_server(false, 0, 0, 0, None, true)?;
        }

        self.drain();
        Ok(())
    }

    /// Drops the handle and everything queued on it
    pub fn delete(self) {
        if let Ok(esp) = self.esp() {
            if self.is_listener(&esp) {
                self.clear_listener(&esp);
            }

            let this = Arc::downgrade(&self.inner);
            esp.shared.netconn.lock(|registry| {
                registry
                    .borrow_mut()
                    .handles
                    .retain(|handle| !handle.ptr_eq(&this) && handle.strong_count() > 0)
            });
        }
        self.drain();
    }

    /// Number of the underlying connection
    pub fn getconnnum(&self) -> Option<usize> {
        self.conn().map(|conn| conn.num())
    }

    /// Underlying connection if one is attached
    pub fn conn(&self) -> Option<Conn> {
        self.inner.with_state(|state| state.conn.clone())
    }

    pub fn conn_type(&self) -> ConnType {
        self.inner.conn_type
    }

    /// Number of buffers waiting in the receive queue
    pub fn rcv_packets(&self) -> usize {
        self.inner.with_state(|state| state.rcv_packets)
    }

    /// Limits the time [Netconn::receive] waits, None waits forever
    #[cfg(feature = "netconn-receive-timeout")]
    pub fn set_receive_timeout(&self, timeout: Option<Duration>) {
        self.inner.with_state(|state| state.receive_timeout = timeout);
    }

    #[cfg(feature = "netconn-receive-timeout")]
    pub fn get_receive_timeout(&self) -> Option<Duration> {
        self.inner.with_state(|state| state.receive_timeout)
    }

    fn udp_conn(&self) -> Result<Conn, Error> {
        if self.inner.conn_type != ConnType::Udp {
            return Err(Error::Par);
        }
        self.conn().ok_or(Error::Closed)
    }

    fn esp(&self) -> Result<Esp, Error> {
        self.inner.shared.upgrade().map(|shared| Esp { shared }).ok_or(Error::Closed)
    }

    fn is_listener(&self, esp: &Esp) -> bool {
        esp.shared.netconn.lock(|registry| {
            registry
                .borrow()
                .listen
                .as_ref()
                .map_or(false, |listen| listen.ptr_eq(&Arc::downgrade(&self.inner)))
        })
    }

    fn clear_listener(&self, esp: &Esp) {
        esp.shared.netconn.lock(|registry| registry.borrow_mut().listen = None);
    }

    /// Empties both queues, queued connections are closed
    fn drain(&self) {
        while let Some(accepted) = self.inner.accept.get_now() {
            if let Accepted::Conn(netconn) = accepted {
                let _ = netconn.close();
            }
        }
        while self.inner.receive.get_now().is_some() {}
        self.inner.with_state(|state| state.rcv_packets = 0);
    }
}

impl embedded_io::ErrorType for Netconn {
    type Error = Error;
}

impl embedded_io::Read for Netconn {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        let (pbuf, offset) = match self.inner.with_state(|state| state.pending.take()) {
            Some(pending) => pending,
            None => match self.receive() {
                Ok(pbuf) => (pbuf, 0),
                Err(Error::Closed) => return Ok(0),
                Err(error) => return Err(error),
            },
        };

        let count = pbuf.copy_partial(buf, offset);
        if offset + count < pbuf.tot_len() {
            self.inner.with_state(|state| state.pending = Some((pbuf, offset + count)));
        }
        Ok(count)
    }
}

impl embedded_io::Write for Netconn {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Netconn::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Netconn::flush(self)
    }
}

/// Netconn attached to a connection through its argument
fn netconn_of(arg: Option<Arg>) -> Option<Arc<NetconnInner>> {
    arg?.downcast::<NetconnInner>().ok()
}

fn listener(shared: &Weak<Shared>) -> Option<Arc<NetconnInner>> {
    let shared = shared.upgrade()?;
    shared
        .netconn
        .lock(|registry| registry.borrow().listen.as_ref().and_then(Weak::upgrade))
}

/// Callback of every connection owned by netconn
fn conn_callback(shared: Weak<Shared>) -> EventFn {
    callback(move |event| match event {
        Event::ConnActive { conn, client: true, .. } => {
            if let Some(inner) = netconn_of(conn.arg()) {
                inner.with_state(|state| state.conn = Some(conn.clone()));
            }
            Flow::Continue
        }
        Event::ConnActive { conn, client: false, .. } => {
            accept(&shared, conn);
            Flow::Continue
        }
        Event::ConnRecv { conn, buf } => {
            let Some(inner) = netconn_of(conn.arg()) else {
                return Flow::IgnoreMore;
            };

            if inner.receive.put_now(Received::Data(buf.clone())).is_err() {
                warn!("Netconn receive queue full, dropping data of connection {}", conn.num());
                return Flow::IgnoreMore;
            }
            inner.with_state(|state| state.rcv_packets += 1);
            Flow::Continue
        }
        Event::ConnClosed { arg, .. } => {
            if let Some(inner) = netconn_of(arg.clone()) {
                let _ = inner.receive.put_now(Received::Closed);
            }
            Flow::Continue
        }
        _ => Flow::Continue,
    })
}

/// Queues a server connection on the listening handle
fn accept(shared: &Weak<Shared>, conn: &Conn) {
    let (Some(esp), Some(listener)) = (shared.upgrade().map(|shared| Esp { shared }), listener(shared)) else {
        debug!("No listening netconn, closing connection {}", conn.num());
        let _ = conn.close(false);
        return;
    };

    let netconn = Netconn::create(&esp, ConnType::Tcp, Some(conn.clone()));
    let arg: Arg = netconn.inner.clone();
    if conn.set_arg(Some(arg)).is_err() {
        return;
    }

    if listener.accept.put_now(Accepted::Conn(netconn)).is_err() {
        warn!("Netconn accept queue full, closing connection {}", conn.num());
        let _ = conn.set_arg(None);
        let _ = conn.close(false);
    }
}

/// Wakes a blocked [Netconn::accept] when the network or the device is gone
fn global_hook(shared: Weak<Shared>) -> EventFn {
    callback(move |event| {
        let signal = match event {
            Event::WifiDisconnected => Accepted::Closed,
            Event::DevicePresent { present: false } => Accepted::NotPresent,
            _ => return Flow::Continue,
        };

        if let Some(listener) = listener(&shared) {
            let _ = listener.accept.put_now(signal);
        }
        Flow::Continue
    })
}
