//! Wire framing (§4.1): a length-prefix header around an ISO 8583 payload,
//! with an optional NAPS tag wrapping the payload itself.

pub mod header;
pub mod naps;

pub use header::{Ascii4Header, Bcd2Header, Binary2Header, HeaderCodec, HeaderStyle};
pub use naps::NapsTag;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const MIN_FRAME_LEN: usize = 20;
const MAX_FRAME_LEN: usize = 1024;

/// A configured reader/writer side of the wire framing: a header codec plus
/// an optional NAPS tag.
pub struct FrameCodec {
    header: Box<dyn HeaderCodec>,
    naps: Option<NapsTag>,
}

impl FrameCodec {
    pub fn new(style: HeaderStyle, naps: Option<NapsTag>) -> Self {
        Self { header: style.codec(), naps }
    }

    /// Read one frame, returning the unwrapped ISO 8583 payload bytes.
    pub async fn read_frame<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<Vec<u8>> {
        let mut header_buf = vec![0u8; self.header.len()];
        reader.read_exact(&mut header_buf).await?;
        let body_len = self.header.decode(&header_buf)?;

        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&body_len) {
            return Err(Error::framing(
                format!("frame length {body_len} outside [{MIN_FRAME_LEN}, {MAX_FRAME_LEN}]"),
                &header_buf,
            ));
        }

        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body).await?;

        match self.naps {
            Some(_) => Ok(NapsTag::strip(&body)?.to_vec()),
            None => Ok(body),
        }
    }

    /// Write one frame, wrapping `payload` with the header (and NAPS tag,
    /// if configured).
    pub async fn write_frame<W: AsyncWrite + Unpin>(&self, writer: &mut W, payload: &[u8]) -> Result<()> {
        let mut body = Vec::with_capacity(payload.len() + 12);
        if let Some(tag) = self.naps {
            body.extend_from_slice(tag.bytes());
        }
        body.extend_from_slice(payload);

        let header_bytes = self.header.encode(body.len())?;
        writer.write_all(&header_bytes).await?;
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_ascii4_without_naps() {
        let codec = FrameCodec::new(HeaderStyle::Ascii4, None);
        let payload = vec![b'0'; 32];
        let mut buf = Vec::new();
        codec.write_frame(&mut buf, &payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = codec.read_frame(&mut cursor).await.unwrap();
        assert_eq!(read_back, payload);
    }

    #[tokio::test]
    async fn roundtrips_binary2_with_naps_atm_tag() {
        let codec = FrameCodec::new(HeaderStyle::Binary2, Some(NapsTag::Atm));
        let payload = vec![b'1'; 40];
        let mut buf = Vec::new();
        codec.write_frame(&mut buf, &payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = codec.read_frame(&mut cursor).await.unwrap();
        assert_eq!(read_back, payload);
    }

    #[tokio::test]
    async fn rejects_frame_shorter_than_minimum() {
        let codec = FrameCodec::new(HeaderStyle::Ascii4, None);
        let mut buf = Vec::new();
        buf.extend_from_slice(b"0010");
        buf.extend_from_slice(&[0u8; 10]);

        let mut cursor = std::io::Cursor::new(buf);
        let err = codec.read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::FramingError { .. }));
    }

    #[tokio::test]
    async fn accepts_either_naps_tag_regardless_of_configured_side() {
        // A connection configured to write the POS tag must still accept an
        // inbound frame tagged ATM (§4.1): both tags are valid on read.
        let codec = FrameCodec::new(HeaderStyle::Ascii4, Some(NapsTag::Pos));
        let mut buf = Vec::new();
        buf.extend_from_slice(b"0032");
        buf.extend_from_slice(NapsTag::Atm.bytes());
        buf.extend_from_slice(&[b'x'; 20]);

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = codec.read_frame(&mut cursor).await.unwrap();
        assert_eq!(read_back, vec![b'x'; 20]);
    }

    #[tokio::test]
    async fn rejects_unrecognized_naps_tag() {
        let codec = FrameCodec::new(HeaderStyle::Ascii4, Some(NapsTag::Pos));
        let mut buf = Vec::new();
        buf.extend_from_slice(b"0032");
        buf.extend_from_slice(b"NOTANAPSTAG!");
        buf.extend_from_slice(&[b'x'; 20]);

        let mut cursor = std::io::Cursor::new(buf);
        let err = codec.read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::FramingError { .. }));
    }
}
