use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::codec::FrameCodec;
use super::frame::IncomingFrame;
use crate::{AppError, AppResult};

/// The read side of a peer connection.
///
/// Wraps the read half of the transport together with the session's codec,
/// the codec state is only ever touched by the task that owns this value.
#[derive(Debug)]
pub struct Connection<R> {
    reader: R,
    buffer: BytesMut,
    codec: FrameCodec,
    read_buffer_size: usize,
    /// protocol violation held back until the frames preceding it are handed out
    violation: Option<AppError>,
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, codec: FrameCodec, read_buffer_size: usize) -> Connection<R> {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(read_buffer_size),
            codec,
            read_buffer_size,
            violation: None,
        }
    }

    /// Reads from the transport until at least one frame completes.
    ///
    /// A protocol violation in the stream is returned as an error and the
    /// connection should be closed. Frames completed ahead of the violation
    /// are returned first, the error comes with the next call. If the peer closes the connection in the
    /// middle of a frame, a transport error is returned. A graceful close on a
    /// frame boundary returns `None`.
    pub async fn read_frames(&mut self) -> AppResult<Option<Vec<IncomingFrame>>> {
        if let Some(violation) = self.violation.take() {
            return Err(violation);
        }
        loop {
            self.buffer.clear();
            self.buffer.reserve(self.read_buffer_size);
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.codec.has_partial_frame() {
                    Err(AppError::TransportError(
                        "connection reset by peer in the middle of a frame".to_string(),
                    ))
                } else {
                    Ok(None)
                };
            }
            let decoded = self.codec.feed(&self.buffer);
            match decoded.violation {
                Some(violation) if decoded.frames.is_empty() => return Err(violation),
                violation => self.violation = violation,
            }
            if !decoded.frames.is_empty() {
                return Ok(Some(decoded.frames));
            }
        }
    }
}
