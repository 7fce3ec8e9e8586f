//! Incremental frame codec.
//!
//! The decoder is a two state machine that never needs more than the current
//! delivery to make progress:
//! - `AwaitingHeader`: collecting the 4 header bytes
//! - `AwaitingBody`: header parsed, collecting `body_len` bytes
//!
//! Bytes may arrive split at any position, one at a time or many frames per
//! delivery, the produced frames are identical either way. A header declaring
//! a body longer than the configured bound poisons the codec, every later
//! call fails with the same protocol error.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use super::frame::{FrameHeader, IncomingFrame, OutgoingFrame, DEFAULT_MAX_BODY_LEN, HEADER_LEN};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    AwaitingHeader,
    AwaitingBody { message_id: u16, body_len: usize },
}

/// Outcome of one `FrameCodec::feed` call.
#[derive(Debug, Default)]
pub struct Decoded {
    pub frames: Vec<IncomingFrame>,
    /// Set once the stream broke the protocol, after `frames` were completed.
    pub violation: Option<AppError>,
}

#[derive(Debug)]
pub struct FrameCodec {
    state: ParseState,
    header: [u8; HEADER_LEN],
    /// header bytes collected so far, the body keeps its own count in `body.len()`
    header_filled: usize,
    body: BytesMut,
    max_body_len: usize,
    rejected: Option<String>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_BODY_LEN)
    }
}

impl FrameCodec {
    pub fn new(max_body_len: usize) -> Self {
        FrameCodec {
            state: ParseState::AwaitingHeader,
            header: [0; HEADER_LEN],
            header_filled: 0,
            body: BytesMut::new(),
            max_body_len,
            rejected: None,
        }
    }

    /// Feed one delivery of bytes, returning every frame it completes in order.
    ///
    /// Frames completed ahead of a protocol violation in the same delivery are
    /// still returned, next to the violation.
    pub fn feed(&mut self, data: &[u8]) -> Decoded {
        let mut decoded = Decoded::default();
        let mut cursor = 0;
        // a single delivery may carry several frames, extract all of them
        loop {
            match self.advance(&data[cursor..]) {
                Ok((consumed, Some(frame))) => {
                    cursor += consumed;
                    decoded.frames.push(frame);
                }
                Ok((_, None)) => break,
                Err(err) => {
                    decoded.violation = Some(err);
                    break;
                }
            }
        }
        decoded
    }

    pub fn encode(&self, message_id: u16, body: &[u8]) -> AppResult<Bytes> {
        let frame = OutgoingFrame::new(message_id, Bytes::copy_from_slice(body), self.max_body_len)?;
        Ok(frame.encode())
    }

    /// True while a header or body is half way through.
    pub fn has_partial_frame(&self) -> bool {
        self.header_filled > 0 || matches!(self.state, ParseState::AwaitingBody { .. })
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.is_some()
    }

    /// Consume bytes until one frame completes or `data` runs out.
    ///
    /// Returns how many bytes were consumed. When no frame is returned, all
    /// of `data` has been consumed and the partial state is retained.
    fn advance(&mut self, data: &[u8]) -> AppResult<(usize, Option<IncomingFrame>)> {
        if let Some(reason) = &self.rejected {
            return Err(AppError::ProtocolError(reason.clone()));
        }
        let mut consumed = 0;
        loop {
            match self.state {
                ParseState::AwaitingHeader => {
                    let take = (HEADER_LEN - self.header_filled).min(data.len() - consumed);
                    self.header[self.header_filled..self.header_filled + take]
                        .copy_from_slice(&data[consumed..consumed + take]);
                    self.header_filled += take;
                    consumed += take;
                    if self.header_filled < HEADER_LEN {
                        return Ok((consumed, None));
                    }

                    let header = FrameHeader::decode(&self.header);
                    self.header_filled = 0;
                    let body_len = header.body_len as usize;
                    if body_len > self.max_body_len {
                        let reason = format!(
                            "message {} declares body length {} over limit {}",
                            header.message_id, body_len, self.max_body_len
                        );
                        self.rejected = Some(reason.clone());
                        return Err(AppError::ProtocolError(reason));
                    }
                    if body_len == 0 {
                        return Ok((
                            consumed,
                            Some(IncomingFrame::new(header.message_id, Bytes::new())),
                        ));
                    }
                    self.body = BytesMut::with_capacity(body_len);
                    self.state = ParseState::AwaitingBody {
                        message_id: header.message_id,
                        body_len,
                    };
                }
                ParseState::AwaitingBody {
                    message_id,
                    body_len,
                } => {
                    let take = (body_len - self.body.len()).min(data.len() - consumed);
                    self.body
                        .extend_from_slice(&data[consumed..consumed + take]);
                    consumed += take;
                    if self.body.len() < body_len {
                        return Ok((consumed, None));
                    }

                    let body = std::mem::take(&mut self.body).freeze();
                    self.state = ParseState::AwaitingHeader;
                    return Ok((consumed, Some(IncomingFrame::new(message_id, body))));
                }
            }
        }
    }
}

impl Decoder for FrameCodec {
    type Item = IncomingFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> AppResult<Option<IncomingFrame>> {
        let (consumed, frame) = self.advance(&src[..])?;
        src.advance(consumed);
        Ok(frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> AppResult<Option<IncomingFrame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.has_partial_frame() => Err(AppError::TransportError(
                "stream closed in the middle of a frame".to_string(),
            )),
            None => Ok(None),
        }
    }
}
