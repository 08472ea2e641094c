//! Entry points of received bytes
//!
//! In buffered mode the reader thread only copies bytes into a ring buffer and wakes the processor
//! thread, which decodes them. In direct mode the reader thread decodes the bytes itself.
use crate::buff::Buff;
use crate::esp::Esp;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::warn;

/// Bytes handed to the decoder at once
const CHUNK_LEN: usize = 256;

pub(crate) trait ByteSink: Send + Sync {
    /// Accepts received bytes, returns the number of accepted bytes
    fn input(&self, esp: &Esp, data: &[u8]) -> usize;

    /// Decodes stored bytes, called by the processor thread
    fn drain(&self, _esp: &Esp) {}
}

/// Stores bytes in a ring buffer for the processor thread
pub(crate) struct BufferedSink {
    buff: CriticalSectionMutex<RefCell<Buff>>,
}

impl BufferedSink {
    pub(crate) fn new(size: usize) -> Option<Self> {
        Some(Self {
            buff: CriticalSectionMutex::new(RefCell::new(Buff::new(size)?)),
        })
    }
}

impl ByteSink for BufferedSink {
    fn input(&self, esp: &Esp, data: &[u8]) -> usize {
        let written = self.buff.lock(|buff| buff.borrow_mut().write(data));
        if written < data.len() {
            warn!("Input buffer full, {} bytes dropped", data.len() - written);
        }

        esp.shared.processor.notify();
        written
    }

    fn drain(&self, esp: &Esp) {
        let mut chunk = [0u8; CHUNK_LEN];

        loop {
            let len = self.buff.lock(|buff| {
                let buff = buff.borrow();
                let block = buff.get_linear_block();
                let len = block.len().min(chunk.len());
                chunk[..len].copy_from_slice(&block[..len]);
                len
            });

            if len == 0 {
                break;
            }

            esp.process(&chunk[..len]);
            self.buff.lock(|buff| buff.borrow_mut().skip(len));
        }
    }
}

/// Decodes bytes on the calling thread
pub(crate) struct DirectSink;

impl ByteSink for DirectSink {
    fn input(&self, esp: &Esp, data: &[u8]) -> usize {
        esp.process(data)
    }
}
