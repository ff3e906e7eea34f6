//! Message header shared by every frame the port delivers.
//!
//! ```text
//!   0            4                        12
//!   ┌────────────┬────────────────────────┬──────────── … ─┐
//!   │ reply_cap  │ message_id             │ payload         │
//!   │ u32        │ u64                    │ kind-specific   │
//!   └────────────┴────────────────────────┴──────────── … ─┘
//! ```

use serde::Serialize;
use shared::constants::HEADER_SIZE;

use crate::comms::events::DecodeError;
use crate::comms::reader::FieldReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageHeader {
    /// Bytes the sender reserved for a reply; zero for fire-and-forget.
    pub reply_capacity: u32,
    /// Identifies the pending request a reply answers.
    pub message_id: u64,
}

impl MessageHeader {
    pub const SIZE: usize = HEADER_SIZE;

    /// Read the header from the front of `buf`. Any bit pattern is accepted.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let reader = FieldReader::new(buf);
        reader.require(Self::SIZE)?;
        Ok(Self {
            reply_capacity: reader.u32_at(0)?,
            message_id: reader.u64_at(4)?,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.reply_capacity.to_ne_bytes());
        out[4..HEADER_SIZE].copy_from_slice(&self.message_id.to_ne_bytes());
        out
    }
}

/// Split a raw frame into its header and the payload that follows it.
pub fn split_frame(buf: &[u8]) -> Result<(MessageHeader, &[u8]), DecodeError> {
    let header = MessageHeader::decode(buf)?;
    Ok((header, &buf[HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reply_capacity_and_id() {
        let hdr = MessageHeader { reply_capacity: 4, message_id: 0xDEAD_BEEF_0042 };
        let mut buf = hdr.encode().to_vec();
        buf.extend_from_slice(&[1, 2, 3]);

        let (back, payload) = split_frame(&buf).unwrap();
        assert_eq!(back, hdr);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn header_only_frame_has_empty_payload() {
        let buf = MessageHeader { reply_capacity: 0, message_id: 7 }.encode();
        let (_, payload) = split_frame(&buf).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn short_buffer_is_rejected() {
        for len in 0..HEADER_SIZE {
            let buf = vec![0xFF; len];
            assert_eq!(
                MessageHeader::decode(&buf),
                Err(DecodeError::TooShort { needed: HEADER_SIZE, actual: len })
            );
        }
    }
}
