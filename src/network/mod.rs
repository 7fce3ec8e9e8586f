//! Network Module Implementation
//!
//! Everything between the socket and the logic dispatcher.
//!
//! # Components
//!
//! - `FrameCodec`: incremental decoder/encoder of the length-delimited wire format
//! - `Connection`: read half of a transport plus the codec feeding it
//! - `Session`: per connection outbound queue, reader and writer tasks
//!
//! # Wire format
//!
//! Every message is a 4 byte header followed by the body. The header carries
//! the message id and the body length, both as big-endian `u16`.

pub use codec::{Decoded, FrameCodec};
pub use connection::Connection;
pub use frame::{FrameHeader, IncomingFrame, OutgoingFrame, DEFAULT_MAX_BODY_LEN, HEADER_LEN};
pub use session::{Session, SessionId, SessionRef};

mod codec;
mod connection;
mod frame;
mod session;
