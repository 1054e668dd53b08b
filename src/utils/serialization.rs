//! Big-endian cursor helpers shared by page decoding and the material codec.
//!
//! Varints use the SQLite encoding: up to eight bytes carrying 7 bits each
//! with the high bit as a continuation flag, and a ninth byte carrying a
//! full 8 bits.

pub const MAX_VARINT_SIZE: usize = 9;

/// Decode a varint from the head of `data`, returning the value and the
/// number of bytes consumed. `None` when `data` ends mid-varint.
pub fn get_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for i in 0..8 {
        let byte = *data.get(i)?;
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    let byte = *data.get(8)?;
    value = (value << 8) | u64::from(byte);
    Some((value, MAX_VARINT_SIZE))
}

pub fn put_varint(buffer: &mut Vec<u8>, value: u64) {
    if value & (0xff00_0000u64 << 32) != 0 {
        let mut out = [0u8; MAX_VARINT_SIZE];
        out[8] = value as u8;
        let mut rest = value >> 8;
        for byte in out[..8].iter_mut().rev() {
            *byte = ((rest & 0x7f) as u8) | 0x80;
            rest >>= 7;
        }
        buffer.extend_from_slice(&out);
        return;
    }

    let mut reversed = [0u8; MAX_VARINT_SIZE];
    let mut length = 0;
    let mut rest = value;
    loop {
        reversed[length] = ((rest & 0x7f) as u8) | 0x80;
        length += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    reversed[0] &= 0x7f;
    buffer.extend(reversed[..length].iter().rev());
}

pub fn varint_len(value: u64) -> usize {
    let mut buffer = Vec::with_capacity(MAX_VARINT_SIZE);
    put_varint(&mut buffer, value);
    buffer.len()
}

pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Sign-extend a big-endian integer of 1..=8 bytes.
pub fn read_signed(bytes: &[u8]) -> i64 {
    let mut value: i64 = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        -1
    } else {
        0
    };
    for byte in bytes {
        value = (value << 8) | i64::from(*byte);
    }
    value
}

/// Append-only writer.
#[derive(Debug, Default)]
pub struct Serialization {
    buffer: Vec<u8>,
}

impl Serialization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_varint(&mut self, value: u64) {
        put_varint(&mut self.buffer, value);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn put_sized_bytes(&mut self, bytes: &[u8]) {
        self.put_varint(bytes.len() as u64);
        self.put_bytes(bytes);
    }

    pub fn put_sized_string(&mut self, value: &str) {
        self.put_sized_bytes(value.as_bytes());
    }

    pub fn finalize(self) -> Vec<u8> {
        self.buffer
    }
}

/// Bounds-checked reader. Every `advance_*` returns `None` on a short read
/// and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct Deserialization<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> Deserialization<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn ended(&self) -> bool {
        self.cursor == self.data.len()
    }

    pub fn seek(&mut self, position: usize) {
        self.cursor = position.min(self.data.len());
    }

    pub fn can_advance(&self, size: usize) -> bool {
        self.cursor
            .checked_add(size)
            .is_some_and(|end| end <= self.data.len())
    }

    pub fn advance_u8(&mut self) -> Option<u8> {
        let value = *self.data.get(self.cursor)?;
        self.cursor += 1;
        Some(value)
    }

    pub fn advance_u32(&mut self) -> Option<u32> {
        let value = read_u32(self.data, self.cursor)?;
        self.cursor += 4;
        Some(value)
    }

    pub fn advance_varint(&mut self) -> Option<u64> {
        let (value, length) = get_varint(&self.data[self.cursor..])?;
        self.cursor += length;
        Some(value)
    }

    pub fn advance_bytes(&mut self, size: usize) -> Option<&'a [u8]> {
        if !self.can_advance(size) {
            return None;
        }
        let bytes = &self.data[self.cursor..self.cursor + size];
        self.cursor += size;
        Some(bytes)
    }

    pub fn advance_sized_bytes(&mut self) -> Option<&'a [u8]> {
        let start = self.cursor;
        let size = self.advance_varint()?;
        let bytes = usize::try_from(size).ok().and_then(|size| self.advance_bytes(size));
        if bytes.is_none() {
            self.cursor = start;
        }
        bytes
    }

    /// A sized string that is not valid UTF-8 reads as `None`.
    pub fn advance_sized_string(&mut self) -> Option<String> {
        let start = self.cursor;
        let text = self
            .advance_sized_bytes()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(str::to_string);
        if text.is_none() {
            self.cursor = start;
        }
        text
    }
}
