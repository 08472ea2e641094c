//! Connection table and connection handles
//!
//! The device offers a fixed number of connection slots. A [Conn] handle names a slot together with
//! the generation (`val_id`) the slot had when the handle was created. Closing a slot moves it to
//! the next generation, so handles of a closed connection never reach a later connection using the
//! same slot number.
//!
//! Small writes may be coalesced in a per connection buffer ([Conn::write]), which is flushed on
//! [Conn::send], [Conn::close] or when it is full.
use crate::esp::{Esp, Shared};
use crate::event::{Arg, EventFn};
use crate::msg::{Op, SendOp, Simple};
use crate::parser::LinkConn;
use crate::types::ConnType;
use crate::Error;
use alloc::sync::Weak;
use alloc::vec::Vec;
use core::fmt::{Debug, Formatter};
use embedded_nal::Ipv4Addr;
use log::debug;

/// One connection slot of the device
pub(crate) struct ConnSlot {
    pub(crate) num: usize,

    /// Generation, incremented whenever the slot is released
    pub(crate) val_id: u32,

    pub(crate) conn_type: ConnType,
    pub(crate) remote_ip: Ipv4Addr,
    pub(crate) remote_port: u16,
    pub(crate) local_port: u16,

    pub(crate) active: bool,

    /// Started by us, false for connections accepted by the server
    pub(crate) client: bool,

    /// Close was requested, events except the close event are suppressed
    pub(crate) in_closing: bool,

    pub(crate) cb: Option<EventFn>,
    pub(crate) arg: Option<Arg>,

    /// Coalescing write buffer
    pub(crate) buff: Option<Vec<u8>>,

    /// Received payload bytes
    pub(crate) total_recved: usize,
}

impl ConnSlot {
    pub(crate) fn new(num: usize) -> Self {
        Self {
            num,
            val_id: 0,
            conn_type: ConnType::Tcp,
            remote_ip: Ipv4Addr::UNSPECIFIED,
            remote_port: 0,
            local_port: 0,
            active: false,
            client: false,
            in_closing: false,
            cb: None,
            arg: None,
            buff: None,
            total_recved: 0,
        }
    }

    /// Initializes the slot for a connection announced by `+LINK_CONN`
    pub(crate) fn activate(&mut self, link: &LinkConn) {
        self.conn_type = link.conn_type;
        self.remote_ip = link.remote_ip;
        self.remote_port = link.remote_port;
        self.local_port = link.local_port;
        self.client = !link.is_server;
        self.val_id = self.val_id.wrapping_add(1);
        self.active = true;
        self.in_closing = false;
        self.cb = None;
        self.arg = None;
        self.buff = None;
        self.total_recved = 0;
    }

    /// Marks the slot inactive and moves it to the next generation
    pub(crate) fn release(&mut self) {
        self.active = false;
        self.in_closing = false;
        self.val_id = self.val_id.wrapping_add(1);
        self.buff = None;
    }

    /// Slot is usable for new requests
    fn check_open(&self) -> Result<(), Error> {
        if !self.active || self.in_closing {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

/// Handle of a connection
#[derive(Clone)]
pub struct Conn {
    pub(crate) shared: Weak<Shared>,
    pub(crate) num: usize,
    pub(crate) val_id: u32,
}

impl Conn {
    /// Connection number on the device
    pub fn num(&self) -> usize {
        self.num
    }

    pub fn is_active(&self) -> bool {
        self.with_slot(|slot| slot.active).unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        !self.is_active()
    }

    /// Connection was started by [Esp::conn_start]
    pub fn is_client(&self) -> bool {
        self.with_slot(|slot| slot.active && slot.client).unwrap_or(false)
    }

    /// Connection was accepted by the server
    pub fn is_server(&self) -> bool {
        self.with_slot(|slot| slot.active && !slot.client).unwrap_or(false)
    }

    pub fn conn_type(&self) -> Option<ConnType> {
        self.with_slot(|slot| slot.conn_type)
    }

    pub fn arg(&self) -> Option<Arg> {
        self.with_slot(|slot| slot.arg.clone()).flatten()
    }

    pub fn set_arg(&self, arg: Option<Arg>) -> Result<(), Error> {
        self.with_slot(|slot| slot.arg = arg).ok_or(Error::Closed)
    }

    pub fn remote_ip(&self) -> Option<Ipv4Addr> {
        self.with_slot(|slot| slot.remote_ip)
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.with_slot(|slot| slot.remote_port)
    }

    pub fn local_port(&self) -> Option<u16> {
        self.with_slot(|slot| slot.local_port)
    }

    /// Number of payload bytes received on the connection
    pub fn total_recved(&self) -> usize {
        self.with_slot(|slot| slot.total_recved).unwrap_or(0)
    }

    /// Closes the connection. Pending buffered data is sent first.
    ///
    /// A non-blocking close marks the connection as closing immediately, so a second close is
    /// rejected before the device answered.
    pub fn close(&self, blocking: bool) -> Result<(), Error> {
        let esp = self.esp()?;
        let pending = esp
            .with_core(|core| {
                let slot = core.slot_mut(self)?;
                slot.check_open().ok()?;
                Some(slot.buff.take())
            })
            .ok_or(Error::Err)?;

        if let Some(data) = pending.filter(|data| !data.is_empty()) {
            self.submit_send(&esp, data, None, false)?;
        }

        let op = Op::Simple(Simple::Close {
            num: self.num,
            val_id: self.val_id,
        });
        esp.execute(op, blocking)?;

        if !blocking {
            esp.with_core(|core| {
                if let Some(slot) = core.slot_mut(self) {
                    slot.in_closing = true;
                }
            });
        }
        debug!("Close of connection {} requested", self.num);
        Ok(())
    }

    /// Sends `data`, appending to buffered data first. Returns the number of bytes written, for
    /// non-blocking calls the number of bytes queued.
    pub fn send(&self, data: &[u8], blocking: bool) -> Result<usize, Error> {
        if data.is_empty() {
            return Err(Error::Par);
        }

        let esp = self.esp()?;
        let max = esp.shared.config.conn_max_data_len;
        let (buffered, flush) = esp
            .with_core(|core| {
                let slot = core.slot_mut(self).ok_or(Error::Closed)?;
                slot.check_open()?;

                let mut copied = 0;
                if let Some(buff) = slot.buff.as_mut() {
                    copied = max.saturating_sub(buff.len()).min(data.len());
                    buff.extend_from_slice(&data[..copied]);
                }
                Ok((copied, slot.buff.take()))
            })?;

        if let Some(buff) = flush.filter(|buff| !buff.is_empty()) {
            self.submit_send(&esp, buff, None, false)?;
        }

        let rest = &data[buffered..];
        if rest.is_empty() {
            return Ok(buffered);
        }
        Ok(buffered + self.submit_send(&esp, rest.to_vec(), None, blocking)?)
    }

    /// Sends a datagram to the given remote, only effective on UDP connections
    pub fn sendto(&self, ip: Ipv4Addr, port: u16, data: &[u8], blocking: bool) -> Result<usize, Error> {
        if data.is_empty() {
            return Err(Error::Par);
        }

        let esp = self.esp()?;
        self.submit_send(&esp, data.to_vec(), Some((ip, port)), blocking)
    }

    /// Buffers `data` and sends every completed chunk of [Config::conn_max_data_len](crate::config::Config::conn_max_data_len)
    /// bytes without blocking. `flush` also sends the incomplete rest.
    ///
    /// Returns the free space of the write buffer.
    pub fn write(&self, data: &[u8], flush: bool) -> Result<usize, Error> {
        let esp = self.esp()?;
        let max = esp.shared.config.conn_max_data_len;
        let mut chunks = Vec::new();

        let available = esp.with_core(|core| {
            let slot = core.slot_mut(self).ok_or(Error::Closed)?;
            slot.check_open()?;
            let mut data = data;

            if let Some(buff) = slot.buff.as_mut() {
                let count = max.saturating_sub(buff.len()).min(data.len());
                buff.extend_from_slice(&data[..count]);
                data = &data[count..];

                if buff.len() >= max {
                    chunks.extend(slot.buff.take());
                }
            }

            while data.len() >= max {
                chunks.push(data[..max].to_vec());
                data = &data[max..];
            }

            if !data.is_empty() {
                slot.buff.get_or_insert_with(|| Vec::with_capacity(max)).extend_from_slice(data);
            }

            if flush {
                chunks.extend(slot.buff.take().filter(|buff| !buff.is_empty()));
            }

            Ok(max - slot.buff.as_ref().map_or(0, Vec::len))
        })?;

        for chunk in chunks {
            self.submit_send(&esp, chunk, None, false)?;
        }
        Ok(available)
    }

    /// Queues a send request, returns the number of bytes written
    fn submit_send(&self, esp: &Esp, data: Vec<u8>, remote: Option<(Ipv4Addr, u16)>, blocking: bool) -> Result<usize, Error> {
        let len = data.len();
        let op = Op::Send(SendOp::new(self.num, self.val_id, data, remote));

        match esp.execute(op, blocking)? {
            Some(msg) => match msg.op {
                Op::Send(op) => Ok(op.sent_all),
                _ => Err(Error::Err),
            },
            None => Ok(len),
        }
    }

    fn esp(&self) -> Result<Esp, Error> {
        self.shared.upgrade().map(|shared| Esp { shared }).ok_or(Error::Closed)
    }

    /// Runs `f` on the slot if the handle is still valid
    fn with_slot<R>(&self, f: impl FnOnce(&mut ConnSlot) -> R) -> Option<R> {
        let esp = self.esp().ok()?;
        esp.with_core(|core| core.slot_mut(self).map(f))
    }
}

impl PartialEq for Conn {
    fn eq(&self, other: &Self) -> bool {
        self.num == other.num && self.val_id == other.val_id && self.shared.ptr_eq(&other.shared)
    }
}

impl Debug for Conn {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Conn")
            .field("num", &self.num)
            .field("val_id", &self.val_id)
            .finish()
    }
}
