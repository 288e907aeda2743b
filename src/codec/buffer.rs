//! Read/write cursors used by the field codec.
//!
//! Mirrors the cursor-over-`Bytes` idiom the wire layer uses elsewhere in
//! this crate: a `ReadCursor` borrows a `Bytes` and advances a position,
//! returning `UnpackError` (with a hex dump of the *whole* input) on
//! short reads rather than panicking.

use crate::error::{self, Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// A cursor over an inbound field-data byte string.
pub struct ReadCursor {
    data: Bytes,
    pos: usize,
}

impl ReadCursor {
    /// Wrap `data` for sequential reads starting at offset 0.
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::unpack(
                format!("need {n} bytes, have {}", self.remaining()),
                &self.data,
            ));
        }
        Ok(())
    }

    /// Read exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.require(n)?;
        let slice = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(slice)
    }

    /// Read `n` bytes and interpret them as ASCII digits, returning the
    /// decimal value they spell out.
    pub fn read_ascii_digits(&mut self, n: usize) -> Result<u64> {
        let raw = self.read_bytes(n)?;
        parse_ascii_digits(&raw)
    }

    /// Read `n` bytes and return the ASCII text they contain (not
    /// necessarily numeric — used for alphanumeric String fields).
    pub fn read_ascii_str(&mut self, n: usize) -> Result<String> {
        let raw = self.read_bytes(n)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| Error::unpack(format!("invalid ASCII: {e}"), &self.data))
    }

    /// Read `n` packed-BCD bytes, returning the `2n`-digit decimal string
    /// they encode (each nibble is one digit, high nibble first).
    pub fn read_bcd_digits(&mut self, n_bytes: usize) -> Result<String> {
        let raw = self.read_bytes(n_bytes)?;
        Ok(bcd_to_digits(&raw))
    }

    /// Read `n` raw bytes and hex-encode them into a `2n`-char uppercase string.
    pub fn read_hex(&mut self, n_bytes: usize) -> Result<String> {
        let raw = self.read_bytes(n_bytes)?;
        Ok(error::hex_dump(&raw).replace(' ', ""))
    }
}

/// A growable buffer for serializing outbound field data.
#[derive(Default)]
pub struct WriteCursor {
    buf: BytesMut,
}

impl WriteCursor {
    /// Start an empty cursor with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Current length of the written data.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append raw bytes verbatim.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Append `digits` as ASCII, left-padded with `'0'` to `width` characters.
    pub fn write_ascii_numeric(&mut self, digits: &str, width: usize) {
        for _ in 0..width.saturating_sub(digits.len()) {
            self.buf.put_u8(b'0');
        }
        self.buf.put_slice(digits.as_bytes());
    }

    /// Append `text` as ASCII, right-padded with spaces to `width` characters.
    pub fn write_ascii_text(&mut self, text: &str, width: usize) {
        self.buf.put_slice(text.as_bytes());
        for _ in 0..width.saturating_sub(text.len()) {
            self.buf.put_u8(b' ');
        }
    }

    /// Append `digits` (left-padded with `'0'` to an even count) packed two-per-byte.
    pub fn write_bcd_digits(&mut self, digits: &str, digit_width: usize) {
        let padded = format!("{digits:0>width$}", width = digit_width);
        self.buf.put_slice(&digits_to_bcd(&padded));
    }

    /// Append `text` as uppercase ASCII hex.
    pub fn write_hex(&mut self, raw: &[u8]) {
        self.buf
            .put_slice(error::hex_dump(raw).replace(' ', "").as_bytes());
    }

    /// Consume the cursor, returning the accumulated bytes.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Parse an ASCII digit string into its decimal value.
pub fn parse_ascii_digits(raw: &[u8]) -> Result<u64> {
    let s = std::str::from_utf8(raw).map_err(|e| Error::unpack(format!("invalid ASCII: {e}"), raw))?;
    s.trim()
        .parse()
        .map_err(|e| Error::unpack(format!("not a decimal number ({e}): {s:?}"), raw))
}

/// Hex-encode `raw` into an uppercase string with no separators.
pub fn hex_encode(raw: &[u8]) -> String {
    error::hex_dump(raw).replace(' ', "")
}

/// Decode an even-length hex string into bytes.
pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::unpack(
            format!("odd-length hex string: {s:?}"),
            s.as_bytes(),
        ));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| Error::unpack(format!("invalid hex digit ({e}): {s:?}"), s.as_bytes()))
        })
        .collect()
}

/// Unpack `n_bytes` of packed BCD into its `2 * n_bytes`-digit decimal string.
pub fn bcd_to_digits(raw: &[u8]) -> String {
    let mut s = String::with_capacity(raw.len() * 2);
    for byte in raw {
        s.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('0'));
        s.push(char::from_digit((byte & 0x0f) as u32, 16).unwrap_or('0'));
    }
    s
}

/// Pack an even-length decimal digit string two digits per byte.
pub fn digits_to_bcd(digits: &str) -> Vec<u8> {
    let chars: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
    let mut out = Vec::with_capacity((chars.len() + 1) / 2);
    let mut iter = chars.chunks(2);
    while let Some(pair) = iter.next() {
        let hi = pair[0];
        let lo = pair.get(1).copied().unwrap_or(0);
        out.push((hi << 4) | lo);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_roundtrip() {
        let packed = digits_to_bcd("123456");
        assert_eq!(packed, vec![0x12, 0x34, 0x56]);
        assert_eq!(bcd_to_digits(&packed), "123456");
    }

    #[test]
    fn ascii_digits_roundtrip() {
        let mut w = WriteCursor::with_capacity(8);
        w.write_ascii_numeric("42", 6);
        let bytes = w.freeze();
        assert_eq!(&bytes[..], b"000042");
        let mut r = ReadCursor::new(bytes);
        assert_eq!(r.read_ascii_digits(6).unwrap(), 42);
    }
}
