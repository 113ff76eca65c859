//! Bit-granular cursor over a borrowed byte buffer.
//!
//! Fields on the radio link are not byte aligned (a 9-bit temperature, a
//! 29-bit compressed quaternion), so every primitive here works on single
//! bits. Bits are packed little-endian within a byte: bit 0 of a byte is the
//! first bit read or written.
//!
//! The stream never owns or grows its buffer. Requests larger than the
//! remaining capacity transfer what fits and return the count actually moved;
//! callers compare that count against what they asked for.

/// Direction argument for [`BitStream::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDir {
    Forward,
    Backward,
}

impl SeekDir {
    /// Maps the `+1` / `-1` convention onto a direction. Any other value is
    /// not a direction.
    pub fn from_sign(dir: i32) -> Option<Self> {
        match dir {
            1 => Some(SeekDir::Forward),
            -1 => Some(SeekDir::Backward),
            _ => None,
        }
    }
}

const fn low_mask(num_bits: usize) -> u8 {
    if num_bits >= 8 {
        0xFF
    } else {
        (1u8 << num_bits) - 1
    }
}

#[derive(Debug)]
pub struct BitStream<B> {
    stream: B,
    byte_offset: usize,
    bit_offset: usize,
}

impl<B: AsRef<[u8]>> BitStream<B> {
    pub fn new(stream: B) -> Self {
        Self {
            stream,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Buffer length in bytes.
    pub fn max_len(&self) -> usize {
        self.stream.as_ref().len()
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn bit_offset(&self) -> usize {
        self.bit_offset
    }

    /// Absolute cursor position in bits.
    pub fn position(&self) -> usize {
        self.byte_offset * 8 + self.bit_offset
    }

    pub fn remaining_bits(&self) -> usize {
        self.max_len() * 8 - self.position()
    }

    pub fn has_next(&self) -> bool {
        self.byte_offset < self.max_len()
    }

    pub fn get_ref(&self) -> &B {
        &self.stream
    }

    pub fn into_inner(self) -> B {
        self.stream
    }

    pub fn reset(&mut self) {
        self.byte_offset = 0;
        self.bit_offset = 0;
    }

    fn set_position(&mut self, position: usize) {
        self.byte_offset = position / 8;
        self.bit_offset = position % 8;
    }

    /// Reads `num_bits <= 8` bits at `position`. The read is split into the
    /// part left in the current byte and the part spilling into the next one.
    fn read_bits_at(&self, position: usize, num_bits: usize) -> u8 {
        let bytes = self.stream.as_ref();
        let byte = position / 8;
        let shift = position % 8;

        let mut val = u16::from(bytes[byte]) >> shift;
        if shift + num_bits > 8 {
            val |= u16::from(bytes[byte + 1]) << (8 - shift);
        }
        (val as u8) & low_mask(num_bits)
    }

    /// Reads up to `num_bits <= 8` bits into the low bits of the returned
    /// byte. Returns `(bits_read, value)`; `bits_read` is 0 when more than
    /// 8 bits are requested.
    pub fn next(&mut self, num_bits: usize) -> (usize, u8) {
        if num_bits > 8 {
            return (0, 0);
        }
        let available = num_bits.min(self.remaining_bits());
        if available == 0 {
            return (0, 0);
        }
        let value = self.read_bits_at(self.position(), available);
        self.set_position(self.position() + available);
        (available, value)
    }

    /// Reads `num_bits` into `res`, byte by byte, low bits first.
    ///
    /// `res` must hold at least `ceil(num_bits / 8)` bytes, otherwise the call
    /// is rejected with 0 and the cursor does not move. The covered prefix of
    /// `res` is zeroed before reading.
    pub fn next_n(&mut self, num_bits: usize, res: &mut [u8]) -> usize {
        let needed = num_bits.div_ceil(8);
        if res.len() < needed {
            return 0;
        }
        res[..needed].fill(0);

        let mut bits_read = 0;
        for slot in res.iter_mut().take(needed) {
            let want = (num_bits - bits_read).min(8);
            let (got, value) = self.next(want);
            *slot = value;
            bits_read += got;
            if got < want {
                break;
            }
        }
        bits_read
    }

    /// Reads `num_bits` into a bit sequence. Rejected (0, no cursor movement)
    /// if `bits` is shorter than `num_bits`. The whole destination is cleared
    /// first.
    pub fn next_bits(&mut self, num_bits: usize, bits: &mut [bool]) -> usize {
        if bits.len() < num_bits {
            return 0;
        }
        bits.fill(false);

        let available = num_bits.min(self.remaining_bits());
        let start = self.position();
        let bytes = self.stream.as_ref();
        for (i, bit) in bits.iter_mut().take(available).enumerate() {
            let pos = start + i;
            *bit = (bytes[pos / 8] >> (pos % 8)) & 1 == 1;
        }
        self.set_position(start + available);
        available
    }

    /// Like [`next_n`](Self::next_n) but leaves the cursor where it was.
    pub fn peek_n(&mut self, num_bits: usize, res: &mut [u8]) -> usize {
        let start = self.position();
        let bits_peeked = self.next_n(num_bits, res);
        self.set_position(start);
        bits_peeked
    }

    /// Like [`next_bits`](Self::next_bits) but leaves the cursor where it was.
    pub fn peek_bits(&mut self, num_bits: usize, bits: &mut [bool]) -> usize {
        let start = self.position();
        let bits_peeked = self.next_bits(num_bits, bits);
        self.set_position(start);
        bits_peeked
    }

    /// Reads an unsigned integer of `num_bits <= 64` bits, LSB first.
    /// Returns `None` without moving if fewer bits remain.
    pub fn read_uint(&mut self, num_bits: usize) -> Option<u64> {
        if num_bits > 64 || num_bits > self.remaining_bits() {
            return None;
        }
        let mut value = 0u64;
        let mut shift = 0;
        while shift < num_bits {
            let (got, byte) = self.next((num_bits - shift).min(8));
            value |= u64::from(byte) << shift;
            shift += got;
        }
        Some(value)
    }

    /// Moves the cursor by `amount` bits. Returns `amount`, or 0 without
    /// moving if the target would fall outside `[0, 8 * max_len]`.
    pub fn seek(&mut self, amount: usize, dir: SeekDir) -> usize {
        let position = self.position();
        let target = match dir {
            SeekDir::Forward => position.checked_add(amount),
            SeekDir::Backward => position.checked_sub(amount),
        };
        match target {
            Some(target) if target <= self.max_len() * 8 => {
                self.set_position(target);
                amount
            }
            _ => 0,
        }
    }

    /// [`seek`](Self::seek) with a signed direction: `+1` forward, `-1`
    /// backward. Any other direction is rejected with 0.
    pub fn seek_g(&mut self, amount: usize, dir: i32) -> usize {
        match SeekDir::from_sign(dir) {
            Some(dir) => self.seek(amount, dir),
            None => 0,
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BitStream<B> {
    fn write_bits_at(&mut self, position: usize, num_bits: usize, value: u8) {
        let bytes = self.stream.as_mut();
        let byte = position / 8;
        let shift = position % 8;

        let mask = u16::from(low_mask(num_bits)) << shift;
        let shifted = u16::from(value & low_mask(num_bits)) << shift;

        bytes[byte] = (bytes[byte] & !(mask as u8)) | (shifted as u8);
        if shift + num_bits > 8 {
            let upper_mask = (mask >> 8) as u8;
            bytes[byte + 1] = (bytes[byte + 1] & !upper_mask) | ((shifted >> 8) as u8);
        }
    }

    /// Writes the low `num_bits <= 8` bits of `value` at the cursor. Stops
    /// early at the end of the buffer; returns the bits written.
    pub fn edit(&mut self, num_bits: usize, value: u8) -> usize {
        if num_bits > 8 {
            return 0;
        }
        let available = num_bits.min(self.remaining_bits());
        if available == 0 {
            return 0;
        }
        let position = self.position();
        self.write_bits_at(position, available, value);
        self.set_position(position + available);
        available
    }

    /// Writes `num_bits` taken from `src`, byte by byte, low bits first.
    ///
    /// `src` must hold `ceil(num_bits / 8)` bytes or the call is rejected
    /// with 0. Capacity is checked once, in bits, against what is left in
    /// this stream.
    pub fn edit_n(&mut self, num_bits: usize, src: &[u8]) -> usize {
        if src.len() < num_bits.div_ceil(8) {
            return 0;
        }
        let to_write = num_bits.min(self.remaining_bits());

        let mut bits_written = 0;
        for &byte in src {
            if bits_written >= to_write {
                break;
            }
            bits_written += self.edit((to_write - bits_written).min(8), byte);
        }
        bits_written
    }

    /// Writes a bit sequence; returns the bits written.
    pub fn edit_bits(&mut self, bits: &[bool]) -> usize {
        let to_write = bits.len().min(self.remaining_bits());
        let start = self.position();
        let bytes = self.stream.as_mut();
        for (i, &bit) in bits.iter().take(to_write).enumerate() {
            let pos = start + i;
            if bit {
                bytes[pos / 8] |= 1 << (pos % 8);
            } else {
                bytes[pos / 8] &= !(1 << (pos % 8));
            }
        }
        self.set_position(start + to_write);
        to_write
    }

    /// Writes an unsigned integer of `num_bits <= 64` bits, LSB first.
    pub fn write_uint(&mut self, num_bits: usize, value: u64) -> usize {
        if num_bits > 64 {
            return 0;
        }
        let bytes = value.to_le_bytes();
        self.edit_n(num_bits, &bytes)
    }

    /// Copies up to `num_bits` from `other`, starting at its cursor, to this
    /// stream's cursor. Never reads more from `other` than fits here.
    pub fn edit_from<C: AsRef<[u8]>>(&mut self, num_bits: usize, other: &mut BitStream<C>) -> usize {
        let to_copy = num_bits.min(self.remaining_bits());
        let mut tmp = vec![0u8; to_copy.div_ceil(8)];
        let bits_read = other.next_n(to_copy, &mut tmp);
        self.edit_n(bits_read, &tmp)
    }

    /// Copies everything from `other`'s cursor to its end.
    pub fn append_stream<C: AsRef<[u8]>>(&mut self, other: &mut BitStream<C>) -> usize {
        let num_bits = other.remaining_bits();
        self.edit_from(num_bits, other)
    }
}
