//! The NAPS 12-byte ASCII tag wrapper (§4.1), identifying a frame's
//! originating channel (ATM or POS) ahead of the ISO 8583 payload.

use crate::error::{Error, Result};

const ATM_TAG: &[u8; 12] = b"ISO016000070";
const POS_TAG: &[u8; 12] = b"ISO026000070";

/// Which NAPS tag to wrap outbound frames with, and to expect on inbound
/// ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NapsTag {
    Atm,
    Pos,
}

impl NapsTag {
    pub fn bytes(self) -> &'static [u8; 12] {
        match self {
            NapsTag::Atm => ATM_TAG,
            NapsTag::Pos => POS_TAG,
        }
    }

    /// Strip a NAPS tag from the front of `frame`, accepting either the ATM
    /// or the POS tag regardless of which one this connection is configured
    /// to write (§4.1: "Inbound prefix bytes must match one of the two
    /// tags; otherwise fail with a framing error").
    pub fn strip(frame: &[u8]) -> Result<&[u8]> {
        if frame.len() >= 12 && (&frame[..12] == ATM_TAG.as_slice() || &frame[..12] == POS_TAG.as_slice()) {
            Ok(&frame[12..])
        } else {
            Err(Error::framing("NAPS tag mismatch", frame))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_either_valid_tag() {
        let mut atm_frame = ATM_TAG.to_vec();
        atm_frame.extend_from_slice(b"hello");
        assert_eq!(NapsTag::strip(&atm_frame).unwrap(), b"hello");

        let mut pos_frame = POS_TAG.to_vec();
        pos_frame.extend_from_slice(b"world");
        assert_eq!(NapsTag::strip(&pos_frame).unwrap(), b"world");
    }

    #[test]
    fn rejects_unrecognized_tag() {
        let mut frame = b"NOTANAPSTAG!".to_vec();
        frame.extend_from_slice(b"hello");
        assert!(NapsTag::strip(&frame).is_err());
    }
}
