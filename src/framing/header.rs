//! Length-prefix header codecs (§4.1): ASCII-4, Binary-2, and BCD-2.

use crate::codec::buffer::{bcd_to_digits, digits_to_bcd, parse_ascii_digits};
use crate::error::{Error, Result};

/// Encodes and decodes a frame's length-prefix header.
pub trait HeaderCodec: Send + Sync {
    /// Number of bytes the header occupies on the wire.
    fn len(&self) -> usize;
    /// Encode `body_len` into a header.
    fn encode(&self, body_len: usize) -> Result<Vec<u8>>;
    /// Decode a header's declared body length.
    fn decode(&self, header: &[u8]) -> Result<usize>;
}

/// 4-digit ASCII decimal length header.
pub struct Ascii4Header;

impl HeaderCodec for Ascii4Header {
    fn len(&self) -> usize {
        4
    }

    fn encode(&self, body_len: usize) -> Result<Vec<u8>> {
        if body_len > 9999 {
            return Err(Error::framing(format!("length {body_len} exceeds ASCII-4 header capacity"), &[]));
        }
        Ok(format!("{body_len:04}").into_bytes())
    }

    fn decode(&self, header: &[u8]) -> Result<usize> {
        Ok(parse_ascii_digits(header)? as usize)
    }
}

/// 2-byte big-endian binary length header.
pub struct Binary2Header;

impl HeaderCodec for Binary2Header {
    fn len(&self) -> usize {
        2
    }

    fn encode(&self, body_len: usize) -> Result<Vec<u8>> {
        let len: u16 = body_len
            .try_into()
            .map_err(|_| Error::framing(format!("length {body_len} exceeds Binary-2 header capacity"), &[]))?;
        Ok(len.to_be_bytes().to_vec())
    }

    fn decode(&self, header: &[u8]) -> Result<usize> {
        Ok(u16::from_be_bytes([header[0], header[1]]) as usize)
    }
}

/// 2-byte BCD length header (4 packed decimal digits).
pub struct Bcd2Header;

impl HeaderCodec for Bcd2Header {
    fn len(&self) -> usize {
        2
    }

    fn encode(&self, body_len: usize) -> Result<Vec<u8>> {
        if body_len > 9999 {
            return Err(Error::framing(format!("length {body_len} exceeds BCD-2 header capacity"), &[]));
        }
        Ok(digits_to_bcd(&format!("{body_len:04}")))
    }

    fn decode(&self, header: &[u8]) -> Result<usize> {
        bcd_to_digits(header)
            .parse()
            .map_err(|_| Error::framing("malformed BCD-2 length header", header))
    }
}

/// The header style a connection is configured with, selected from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStyle {
    Ascii4,
    Binary2,
    Bcd2,
}

impl HeaderStyle {
    pub fn codec(self) -> Box<dyn HeaderCodec> {
        match self {
            HeaderStyle::Ascii4 => Box::new(Ascii4Header),
            HeaderStyle::Binary2 => Box::new(Binary2Header),
            HeaderStyle::Bcd2 => Box::new(Bcd2Header),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii4_roundtrip() {
        let h = Ascii4Header;
        let header = h.encode(128).unwrap();
        assert_eq!(header, b"0128");
        assert_eq!(h.decode(&header).unwrap(), 128);
    }

    #[test]
    fn binary2_roundtrip() {
        let h = Binary2Header;
        let header = h.encode(300).unwrap();
        assert_eq!(h.decode(&header).unwrap(), 300);
    }

    #[test]
    fn bcd2_roundtrip() {
        let h = Bcd2Header;
        let header = h.encode(45).unwrap();
        assert_eq!(h.decode(&header).unwrap(), 45);
    }

    #[test]
    fn ascii4_rejects_oversized_length() {
        assert!(Ascii4Header.encode(10_000).is_err());
    }
}
