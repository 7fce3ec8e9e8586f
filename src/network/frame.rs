use bytes::{BufMut, Bytes, BytesMut};

use crate::{AppError, AppResult};

/// 2 bytes message id followed by 2 bytes body length, both big-endian.
pub const HEADER_LEN: usize = 4;
/// Default bound on a frame body: a 2048 byte message buffer minus a 2 byte
/// length prefix.
pub const DEFAULT_MAX_BODY_LEN: usize = 2046;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_id: u16,
    pub body_len: u16,
}

impl FrameHeader {
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> FrameHeader {
        FrameHeader {
            message_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            body_len: u16::from_be_bytes([bytes[2], bytes[3]]),
        }
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.put_u16(self.message_id);
        dst.put_u16(self.body_len);
    }
}

/// A frame reassembled from the byte stream of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFrame {
    pub message_id: u16,
    pub body: Bytes,
}

impl IncomingFrame {
    pub fn new(message_id: u16, body: Bytes) -> Self {
        IncomingFrame { message_id, body }
    }
}

/// A frame on its way out, validated against the body bound at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    message_id: u16,
    body: Bytes,
}

impl OutgoingFrame {
    pub fn new(message_id: u16, body: Bytes, max_body_len: usize) -> AppResult<Self> {
        if body.len() > max_body_len || body.len() > u16::MAX as usize {
            return Err(AppError::MessageTooLarge(format!(
                "body of {} bytes for message {} exceeds limit {}",
                body.len(),
                message_id,
                max_body_len
            )));
        }
        Ok(OutgoingFrame { message_id, body })
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        FrameHeader {
            message_id: self.message_id,
            body_len: self.body.len() as u16,
        }
        .write_to(dst);
        dst.put_slice(&self.body);
    }

    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.wire_len());
        self.write_to(&mut buffer);
        buffer.freeze()
    }
}
