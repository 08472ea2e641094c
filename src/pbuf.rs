//! # Packet buffers
//!
//! Received payload is handed out as [Pbuf] chains. Every node owns a contiguous payload window
//! and a link to the next node. A [Pbuf] value is one reference on its head node: cloning takes
//! another reference on the head only, dropping or [Pbuf::free] releases it.
//!
//! Releasing the last reference of a head walks down the chain and releases every node whose
//! reference count reaches zero, stopping at the first node still referenced elsewhere. The walk
//! is a loop, so long chains never recurse.
//!
//! ## Example
//!
//! ````
//! use esp_at_host::pbuf::Pbuf;
//!
//! let head = Pbuf::new(3);
//! head.take(b"foo", 0).unwrap();
//!
//! let tail = Pbuf::new(3);
//! tail.take(b"bar", 0).unwrap();
//!
//! head.cat(tail);
//! assert_eq!(6, head.tot_len());
//! assert_eq!(Some(2), head.strfind("ob", 0));
//! assert_eq!(2, head.free());
//! ````
use crate::Error;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt::{Debug, Formatter};
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embedded_nal::Ipv4Addr;

/// Reference counted, chainable payload buffer
#[derive(Clone)]
pub struct Pbuf {
    node: Arc<Node>,
}

struct Node {
    state: CriticalSectionMutex<RefCell<NodeState>>,
}

struct NodeState {
    /// Payload storage, the valid window is `payload[start..start + len]`
    payload: Vec<u8>,

    /// Start of the payload window
    start: usize,

    /// Length of the payload window
    len: usize,

    /// `len` plus the `tot_len` of all following nodes
    tot_len: usize,

    next: Option<Arc<Node>>,

    /// Remote address of received data
    ip: Ipv4Addr,
    port: u16,
}

impl Node {
    fn take_next(&mut self) -> Option<Arc<Node>> {
        self.state.get_mut().get_mut().next.take()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut next = self.take_next();
        while let Some(node) = next {
            next = match Arc::into_inner(node) {
                Some(mut inner) => inner.take_next(),
                None => None,
            };
        }
    }
}

impl Pbuf {
    /// Allocates a single node with a zeroed payload of `len` bytes
    pub fn new(len: usize) -> Self {
        let state = NodeState {
            payload: vec![0; len],
            start: 0,
            len,
            tot_len: len,
            next: None,
            ip: Ipv4Addr::UNSPECIFIED,
            port: 0,
        };

        Self {
            node: Arc::new(Node {
                state: CriticalSectionMutex::new(RefCell::new(state)),
            }),
        }
    }

    /// Releases this reference and returns the number of nodes actually freed
    pub fn free(self) -> usize {
        let mut freed = 0;
        let mut next = Some(self.node);

        while let Some(node) = next {
            match Arc::into_inner(node) {
                Some(mut inner) => {
                    freed += 1;
                    next = inner.take_next();
                }
                None => break,
            }
        }

        freed
    }

    /// Number of references held on the head node
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.node)
    }

    /// Appends `tail` to the end of this chain. The reference held by `tail` moves into the chain.
    pub fn cat(&self, tail: Pbuf) {
        critical_section::with(|cs| {
            let add = tail.node.state.borrow(cs).borrow().tot_len;
            let mut node = self.node.clone();

            loop {
                let mut state = node.state.borrow(cs).borrow_mut();
                state.tot_len += add;

                match state.next.clone() {
                    Some(next) => {
                        drop(state);
                        node = next;
                    }
                    None => {
                        state.next = Some(tail.node);
                        break;
                    }
                }
            }
        });
    }

    /// Appends `tail` to the end of this chain and keeps the caller's reference on `tail` valid
    pub fn chain(&self, tail: &Pbuf) {
        self.cat(tail.clone());
    }

    /// Detaches everything after the head node. The returned chain carries the reference the head
    /// held on it.
    pub fn unchain(&self) -> Option<Pbuf> {
        critical_section::with(|cs| {
            let mut state = self.node.state.borrow(cs).borrow_mut();
            let next = state.next.take()?;
            state.tot_len = state.len;
            Some(Pbuf { node: next })
        })
    }

    /// Returns a new reference on the next node
    pub fn next(&self) -> Option<Pbuf> {
        self.with_state(|state| state.next.clone().map(|node| Pbuf { node }))
    }

    /// Payload length of the head node
    pub fn len(&self) -> usize {
        self.with_state(|state| state.len)
    }

    /// True if the whole chain is empty
    pub fn is_empty(&self) -> bool {
        self.tot_len() == 0
    }

    /// Payload length of the whole chain
    pub fn tot_len(&self) -> usize {
        self.with_state(|state| state.tot_len)
    }

    /// Remote IP the data was received from
    pub fn ip(&self) -> Ipv4Addr {
        self.with_state(|state| state.ip)
    }

    /// Remote port the data was received from
    pub fn port(&self) -> u16 {
        self.with_state(|state| state.port)
    }

    /// Sets the remote address of the head node
    pub fn set_ip(&self, ip: Ipv4Addr, port: u16) {
        critical_section::with(|cs| {
            let mut state = self.node.state.borrow(cs).borrow_mut();
            state.ip = ip;
            state.port = port;
        });
    }

    /// Copies `data` into the chain starting at the logical `offset`
    pub fn take(&self, data: &[u8], offset: usize) -> Result<(), Error> {
        if !self.contains(offset, data.len()) {
            return Err(Error::Par);
        }

        let mut offset = offset;
        let mut data = data;
        critical_section::with(|cs| {
            let mut current = Some(self.node.clone());
            while let Some(node) = current {
                if data.is_empty() {
                    break;
                }

                let mut state = node.state.borrow(cs).borrow_mut();
                if offset >= state.len {
                    offset -= state.len;
                } else {
                    let count = data.len().min(state.len - offset);
                    let start = state.start + offset;
                    state.payload[start..start + count].copy_from_slice(&data[..count]);
                    data = &data[count..];
                    offset = 0;
                }
                current = state.next.clone();
            }
        });

        Ok(())
    }

    /// Copies `out.len()` bytes starting at the logical `offset` out of the chain. Returns the number
    /// of copied bytes, zero if the range exceeds the chain.
    pub fn copy(&self, out: &mut [u8], offset: usize) -> usize {
        if out.is_empty() || !self.contains(offset, out.len()) {
            return 0;
        }

        let mut offset = offset;
        let mut copied = 0;
        critical_section::with(|cs| {
            let mut current = Some(self.node.clone());
            while let Some(node) = current {
                if copied == out.len() {
                    break;
                }

                let state = node.state.borrow(cs).borrow();
                if offset >= state.len {
                    offset -= state.len;
                } else {
                    let count = (out.len() - copied).min(state.len - offset);
                    let start = state.start + offset;
                    out[copied..copied + count].copy_from_slice(&state.payload[start..start + count]);
                    copied += count;
                    offset = 0;
                }
                current = state.next.clone();
            }
        });

        copied
    }

    /// Returns the whole chain payload as one vector
    pub fn to_vec(&self) -> Vec<u8> {
        let mut data = vec![0; self.tot_len()];
        self.copy(&mut data, 0);
        data
    }

    /// Returns the byte at the logical position `pos`
    pub fn get_at(&self, pos: usize) -> Option<u8> {
        let mut pos = pos;
        critical_section::with(|cs| {
            let mut current = Some(self.node.clone());
            while let Some(node) = current {
                let state = node.state.borrow(cs).borrow();
                if pos < state.len {
                    return Some(state.payload[state.start + pos]);
                }
                pos -= state.len;
                current = state.next.clone();
            }
            None
        })
    }

    /// Compares `data` with the chain content at `offset`.
    ///
    /// Returns 0 on a match, the index of the first different byte plus one otherwise and
    /// `usize::MAX` if the range exceeds the chain.
    pub fn memcmp(&self, data: &[u8], offset: usize) -> usize {
        if !self.contains(offset, data.len()) {
            return usize::MAX;
        }

        for (i, expected) in data.iter().enumerate() {
            match self.get_at(offset + i) {
                Some(byte) if byte == *expected => {}
                _ => return i + 1,
            }
        }

        0
    }

    /// Finds the first position of `needle` at or after `offset`, also across node boundaries
    pub fn memfind(&self, needle: &[u8], offset: usize) -> Option<usize> {
        let tot_len = self.tot_len();
        if needle.is_empty() || needle.len() > tot_len {
            return None;
        }

        (offset..=tot_len - needle.len()).find(|&position| self.memcmp(needle, position) == 0)
    }

    /// String version of [Self::memfind]
    pub fn strfind(&self, needle: &str, offset: usize) -> Option<usize> {
        self.memfind(needle.as_bytes(), offset)
    }

    /// Moves the payload window of the head node.
    ///
    /// A positive `len` trims bytes from the front, a negative one gives previously trimmed bytes
    /// back. Only the head node is adjusted: nodes chained in front of this one keep their
    /// `tot_len`. Returns false if the window cannot be moved.
    pub fn advance(&self, len: isize) -> bool {
        if len == 0 {
            return false;
        }

        critical_section::with(|cs| {
            let mut state = self.node.state.borrow(cs).borrow_mut();
            let amount = len.unsigned_abs();

            if len > 0 {
                if amount > state.len {
                    return false;
                }
                state.start += amount;
                state.len -= amount;
                state.tot_len -= amount;
            } else {
                if amount > state.start {
                    return false;
                }
                state.start -= amount;
                state.len += amount;
                state.tot_len += amount;
            }
            true
        })
    }

    /// Copies up to `out.len()` bytes starting at `offset`, returns the copied count
    pub(crate) fn copy_partial(&self, out: &mut [u8], offset: usize) -> usize {
        let available = self.tot_len().saturating_sub(offset).min(out.len());
        self.copy(&mut out[..available], offset)
    }

    /// `len` bytes from `offset` lie within the chain
    fn contains(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).map_or(false, |end| end <= self.tot_len())
    }

    fn with_state<R>(&self, f: impl FnOnce(&NodeState) -> R) -> R {
        self.node.state.lock(|state| f(&state.borrow()))
    }
}

impl Debug for Pbuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        self.with_state(|state| {
            f.debug_struct("Pbuf")
                .field("len", &state.len)
                .field("tot_len", &state.tot_len)
                .field("ip", &state.ip)
                .field("port", &state.port)
                .finish()
        })
    }
}
