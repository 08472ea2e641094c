//! Fixed capacity ring buffer for received bytes
//!
//! One slot is always kept empty to tell a full buffer from an empty one, so at most `size - 1`
//! bytes can be stored.
use alloc::vec;
use alloc::vec::Vec;

/// Circular byte buffer
pub struct Buff {
    /// Backing storage
    buff: Vec<u8>,

    /// Read index
    r: usize,

    /// Write index
    w: usize,
}

impl Buff {
    /// Creates a buffer with the given capacity. Returns None for a zero size.
    pub fn new(size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }

        Some(Self {
            buff: vec![0; size],
            r: 0,
            w: 0,
        })
    }

    /// Capacity of the backing storage
    pub fn size(&self) -> usize {
        self.buff.len()
    }

    /// Drops all stored bytes
    pub fn reset(&mut self) {
        self.r = 0;
        self.w = 0;
    }

    /// Copies as much of `data` as fits and returns the number of bytes written
    pub fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.get_free());
        if count == 0 {
            return 0;
        }

        // Up to the end of the storage
        let first = count.min(self.size() - self.w);
        self.buff[self.w..self.w + first].copy_from_slice(&data[..first]);
        self.w += first;

        // Wrapped part
        let second = count - first;
        if second > 0 {
            self.buff[..second].copy_from_slice(&data[first..count]);
            self.w = second;
        }

        if self.w >= self.size() {
            self.w = 0;
        }

        count
    }

    /// Reads up to `data.len()` bytes and returns the number of bytes read
    pub fn read(&mut self, data: &mut [u8]) -> usize {
        let count = self.peek(0, data);
        self.skip(count)
    }

    /// Copies up to `data.len()` bytes without consuming them, starting `skip_count` bytes after the
    /// read position
    pub fn peek(&self, skip_count: usize, data: &mut [u8]) -> usize {
        let full = self.get_full();
        if skip_count >= full {
            return 0;
        }

        let mut r = self.r + skip_count;
        if r >= self.size() {
            r -= self.size();
        }

        let count = data.len().min(full - skip_count);
        let first = count.min(self.size() - r);
        data[..first].copy_from_slice(&self.buff[r..r + first]);

        let second = count - first;
        if second > 0 {
            data[first..count].copy_from_slice(&self.buff[..second]);
        }

        count
    }

    /// Free space in bytes
    pub fn get_free(&self) -> usize {
        let size = self.size();
        if self.w == self.r {
            size - 1
        } else if self.r > self.w {
            self.r - self.w - 1
        } else {
            size - (self.w - self.r) - 1
        }
    }

    /// Number of stored bytes
    pub fn get_full(&self) -> usize {
        if self.w >= self.r {
            self.w - self.r
        } else {
            self.size() - (self.r - self.w)
        }
    }

    /// Longest contiguous run of stored bytes starting at the read position
    pub fn get_linear_block(&self) -> &[u8] {
        let len = self.get_linear_block_length();
        &self.buff[self.r..self.r + len]
    }

    /// Length of [Self::get_linear_block]
    pub fn get_linear_block_length(&self) -> usize {
        if self.w > self.r {
            self.w - self.r
        } else if self.r > self.w {
            self.size() - self.r
        } else {
            0
        }
    }

    /// Consumes up to `len` bytes without copying them, returns the skipped count
    pub fn skip(&mut self, len: usize) -> usize {
        let len = len.min(self.get_full());
        self.r += len;
        if self.r >= self.size() {
            self.r -= self.size();
        }
        len
    }
}
