//! Wire-level types and message parsing for the RFB protocol (RFC 6143).
//!
//! This crate covers the receive side of a VNC client's update path:
//!
//! - [`io`] - buffered streams over any async transport, with big-endian
//!   primitive accessors
//! - [`messages::types`] - [`PixelFormat`], [`EncodingType`] and
//!   [`RectangleHeader`] value types
//! - [`messages::server`] - the `FramebufferUpdate` message reader, which
//!   consumes rectangle headers and their encoded payloads
//!
//! The handshake, security negotiation and client-to-server messages are
//! not handled here; callers are expected to have completed those before
//! handing the stream to [`FramebufferUpdate::read_from`].
//!
//! [`PixelFormat`]: messages::types::PixelFormat
//! [`EncodingType`]: messages::types::EncodingType
//! [`RectangleHeader`]: messages::types::RectangleHeader
//! [`FramebufferUpdate::read_from`]: messages::server::FramebufferUpdate::read_from

pub mod errors;
pub mod io;
pub mod messages;

pub use errors::ProtocolError;
pub use io::{RfbInStream, RfbOutStream};
