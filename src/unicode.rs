/// Result of feeding one byte into [Utf8Decoder]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Utf8State {
    /// A complete sequence is available in [Utf8Decoder::bytes]
    Complete,

    /// More continuation bytes are expected
    InProgress,

    /// Invalid lead or continuation byte
    Invalid,
}

/// Incremental UTF-8 sequence validator
#[derive(Default)]
pub(crate) struct Utf8Decoder {
    ch: [u8; 4],

    /// Total length of the current sequence
    total: usize,

    /// Remaining continuation bytes
    remaining: usize,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, byte: u8) -> Utf8State {
        if self.remaining == 0 {
            self.total = match byte {
                0x00..=0x7F => 1,
                0xC0..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF7 => 4,
                _ => return Utf8State::Invalid,
            };
            self.ch[0] = byte;
            self.remaining = self.total - 1;
        } else {
            if byte & 0xC0 != 0x80 {
                self.remaining = 0;
                return Utf8State::Invalid;
            }
            self.ch[self.total - self.remaining] = byte;
            self.remaining -= 1;
        }

        if self.remaining == 0 {
            Utf8State::Complete
        } else {
            Utf8State::InProgress
        }
    }

    /// Bytes of the last complete sequence
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.ch[..self.total]
    }
}
