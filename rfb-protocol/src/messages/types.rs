//! Core RFB protocol value types.
//!
//! - [`PixelFormat`] - negotiated wire pixel layout (bit depths, channel
//!   positions, endianness)
//! - [`EncodingType`] - how a rectangle's payload is encoded
//! - [`RectangleHeader`] - geometry plus encoding of one update rectangle

use crate::errors::ProtocolError;
use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// RFB pixel format negotiated during the handshake.
///
/// # Wire Format
///
/// 16 bytes:
///
/// ```text
///  offset  size  field
///    0       1   bits_per_pixel
///    1       1   depth
///    2       1   big_endian (0 or 1)
///    3       1   true_color (0 or 1)
///    4       2   red_max
///    6       2   green_max
///    8       2   blue_max
///   10       1   red_shift
///   11       1   green_shift
///   12       1   blue_shift
///   13       3   padding (must be zero)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The default client format: 32 bpp BGRA, depth 24, little-endian.
    ///
    /// Pixels land in memory as `B,G,R,A` with the alpha byte opaque.
    pub fn bgra8888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Bytes occupied by one native pixel (1, 2 or 4).
    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel.div_ceil(8))
    }

    /// Bytes occupied by one compact pixel (CPIXEL) inside ZRLE tiles.
    ///
    /// `ceil(depth / 8)`: 3 for the default depth-24 format, where the
    /// server omits the unused high byte of each 32-bit pixel.
    pub fn cpixel_size(&self) -> usize {
        usize::from(self.depth.div_ceil(8))
    }

    /// Read a PixelFormat from an RFB input stream, validating strictly.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> Result<Self, ProtocolError> {
        let bits_per_pixel = stream.read_u8().await?;
        let depth = stream.read_u8().await?;
        let big_endian = stream.read_u8().await?;
        let true_color = stream.read_u8().await?;

        if big_endian > 1 {
            return Err(ProtocolError::Malformed(format!(
                "big_endian must be 0 or 1, got {}",
                big_endian
            )));
        }
        if true_color > 1 {
            return Err(ProtocolError::Malformed(format!(
                "true_color must be 0 or 1, got {}",
                true_color
            )));
        }
        if !matches!(bits_per_pixel, 8 | 16 | 32) {
            return Err(ProtocolError::Malformed(format!(
                "bits_per_pixel must be 8, 16 or 32, got {}",
                bits_per_pixel
            )));
        }
        if depth == 0 || depth > bits_per_pixel {
            return Err(ProtocolError::Malformed(format!(
                "depth {} out of range for {} bpp",
                depth, bits_per_pixel
            )));
        }

        let red_max = stream.read_u16().await?;
        let green_max = stream.read_u16().await?;
        let blue_max = stream.read_u16().await?;
        let red_shift = stream.read_u8().await?;
        let green_shift = stream.read_u8().await?;
        let blue_shift = stream.read_u8().await?;

        let mut padding = [0u8; 3];
        stream.read_bytes(&mut padding).await?;
        if padding != [0, 0, 0] {
            return Err(ProtocolError::Malformed(format!(
                "pixel format padding must be zero, got {:?}",
                padding
            )));
        }

        Ok(Self {
            bits_per_pixel,
            depth,
            big_endian: big_endian == 1,
            true_color: true_color == 1,
            red_max,
            green_max,
            blue_max,
            red_shift,
            green_shift,
            blue_shift,
        })
    }

    /// Write this PixelFormat to an RFB output stream.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(self.bits_per_pixel);
        stream.write_u8(self.depth);
        stream.write_u8(self.big_endian.into());
        stream.write_u8(self.true_color.into());
        stream.write_u16(self.red_max);
        stream.write_u16(self.green_max);
        stream.write_u16(self.blue_max);
        stream.write_u8(self.red_shift);
        stream.write_u8(self.green_shift);
        stream.write_u8(self.blue_shift);
        stream.write_bytes(&[0, 0, 0]);
    }
}

/// How a rectangle's payload is encoded on the wire.
///
/// The numeric codes are the RFB encoding-type values; anything outside
/// the supported set is carried as [`Unsupported`](Self::Unsupported) so
/// the caller can report it before tearing the session down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingType {
    /// Uncompressed pixels in the server's format (type 0).
    Raw,
    /// Copy from another framebuffer region (type 1).
    CopyRect,
    /// Zlib run-length encoding in 64x64 tiles (type 16).
    Zrle,
    /// Any other encoding or pseudo-encoding code.
    Unsupported(i32),
}

impl EncodingType {
    /// Map a wire encoding code onto the supported set.
    pub fn from_wire(code: i32) -> Self {
        match code {
            0 => Self::Raw,
            1 => Self::CopyRect,
            16 => Self::Zrle,
            other => Self::Unsupported(other),
        }
    }

    /// The wire encoding code.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Raw => 0,
            Self::CopyRect => 1,
            Self::Zrle => 16,
            Self::Unsupported(code) => code,
        }
    }
}

/// Header of one framebuffer-update rectangle.
///
/// # Wire Format
///
/// 12 bytes, all big-endian:
///
/// ```text
///  offset  size  field
///    0       2   x
///    2       2   y
///    4       2   width
///    6       2   height
///    8       4   encoding type (signed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectangleHeader {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: EncodingType,
}

impl RectangleHeader {
    /// Read a rectangle header. The payload that follows is not consumed.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
            encoding: EncodingType::from_wire(stream.read_i32().await?),
        })
    }

    /// Write a rectangle header.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u16(self.x);
        stream.write_u16(self.y);
        stream.write_u16(self.width);
        stream.write_u16(self.height);
        stream.write_i32(self.encoding.to_wire());
    }
}
