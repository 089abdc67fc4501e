//! RFB message types for the server-to-client update path.

pub mod server;
pub mod types;

pub use server::{EncodedRectangle, FramebufferUpdate};
pub use types::{EncodingType, PixelFormat, RectangleHeader};
