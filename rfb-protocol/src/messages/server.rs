//! The `FramebufferUpdate` server message.
//!
//! Reading an update consumes the whole message off the transport:
//! rectangle count, then for each rectangle its 12-byte header and the
//! encoded payload that follows. Payload length depends on the encoding:
//!
//! ```text
//!  Raw       width * height * bytes_per_pixel
//!  CopyRect  4 (src_x:u16, src_y:u16)
//!  ZRLE      4-byte big-endian compressed length, then that many bytes
//!  other     unknown - the stream cannot be re-synchronised past it
//! ```
//!
//! The message is produced whole or not at all; there is no partial-frame
//! tolerance, because a half-consumed payload leaves the stream position
//! undefined.

use super::types::{EncodingType, PixelFormat, RectangleHeader};
use crate::errors::ProtocolError;
use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// One rectangle with its still-encoded payload.
///
/// For ZRLE the payload keeps the 4-byte length prefix so the decoder can
/// validate the declared length against what was actually received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRectangle {
    pub header: RectangleHeader,
    pub payload: Vec<u8>,
}

/// A complete framebuffer update: every rectangle with its payload bytes.
///
/// Rectangle order is load-bearing: ZRLE payloads are slices of one
/// continuous zlib stream, defined in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferUpdate {
    pub rectangles: Vec<EncodedRectangle>,
}

impl FramebufferUpdate {
    /// Read a framebuffer update from the stream.
    ///
    /// The caller has already consumed the 1-byte message type and the
    /// 1-byte padding; reading starts at the u16 rectangle count. The
    /// pixel format determines Raw payload sizes.
    ///
    /// A rectangle with an unsupported encoding ends the read early: its
    /// payload length is unknown, so nothing after it can be parsed. The
    /// rectangle is still returned (with an empty payload) so the caller
    /// can report it before tearing the session down.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
        pixel_format: &PixelFormat,
    ) -> Result<Self, ProtocolError> {
        let num_rectangles = stream.read_u16().await?;
        tracing::debug!(num_rectangles, "reading framebuffer update");

        let mut rectangles = Vec::with_capacity(usize::from(num_rectangles));
        for _ in 0..num_rectangles {
            let header = RectangleHeader::read_from(stream).await?;
            let payload = match header.encoding {
                EncodingType::Raw => {
                    let len = raw_payload_len(&header, pixel_format)?;
                    stream.read_exact_vec(len).await?
                }
                EncodingType::CopyRect => stream.read_exact_vec(4).await?,
                EncodingType::Zrle => {
                    let compressed_len = stream.read_u32().await?;
                    let mut payload = Vec::with_capacity(4 + compressed_len as usize);
                    payload.extend_from_slice(&compressed_len.to_be_bytes());
                    payload.extend_from_slice(
                        &stream.read_exact_vec(compressed_len as usize).await?,
                    );
                    payload
                }
                EncodingType::Unsupported(code) => {
                    tracing::warn!(
                        code,
                        "unsupported encoding, cannot re-synchronise past it"
                    );
                    rectangles.push(EncodedRectangle {
                        header,
                        payload: Vec::new(),
                    });
                    return Ok(Self { rectangles });
                }
            };
            tracing::trace!(
                x = header.x,
                y = header.y,
                width = header.width,
                height = header.height,
                encoding = header.encoding.to_wire(),
                payload_len = payload.len(),
                "read rectangle"
            );
            rectangles.push(EncodedRectangle { header, payload });
        }

        Ok(Self { rectangles })
    }

    /// Write the full message: type byte, padding, count, rectangles.
    ///
    /// Payload bytes are written verbatim after each header.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u8(0); // message type
        stream.write_u8(0); // padding
        stream.write_u16(self.rectangles.len() as u16);

        for rect in &self.rectangles {
            rect.header.write_to(stream);
            stream.write_bytes(&rect.payload);
        }
    }
}

fn raw_payload_len(
    header: &RectangleHeader,
    pixel_format: &PixelFormat,
) -> Result<usize, ProtocolError> {
    usize::from(header.width)
        .checked_mul(usize::from(header.height))
        .and_then(|area| area.checked_mul(pixel_format.bytes_per_pixel()))
        .ok_or_else(|| {
            ProtocolError::Malformed(format!(
                "raw rectangle {}x{} overflows payload size",
                header.width, header.height
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(width: u16, height: u16, encoding: EncodingType) -> RectangleHeader {
        RectangleHeader {
            x: 10,
            y: 20,
            width,
            height,
            encoding,
        }
    }

    /// Serialise an update and strip the type + padding bytes the caller
    /// would have consumed before `read_from`.
    async fn wire_bytes(update: &FramebufferUpdate) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut out = RfbOutStream::new(&mut buffer);
        update.write_to(&mut out);
        out.flush().await.unwrap();
        buffer[2..].to_vec()
    }

    #[tokio::test]
    async fn raw_rectangle_payload_size() {
        let pf = PixelFormat::bgra8888();
        let original = FramebufferUpdate {
            rectangles: vec![EncodedRectangle {
                header: header(3, 2, EncodingType::Raw),
                payload: vec![0xAB; 3 * 2 * 4],
            }],
        };

        let bytes = wire_bytes(&original).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let read_back = FramebufferUpdate::read_from(&mut stream, &pf).await.unwrap();

        assert_eq!(original, read_back);
    }

    #[tokio::test]
    async fn copyrect_payload_is_four_bytes() {
        let pf = PixelFormat::bgra8888();
        let original = FramebufferUpdate {
            rectangles: vec![EncodedRectangle {
                header: header(100, 50, EncodingType::CopyRect),
                payload: vec![0, 5, 0, 7], // src (5, 7)
            }],
        };

        let bytes = wire_bytes(&original).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let read_back = FramebufferUpdate::read_from(&mut stream, &pf).await.unwrap();

        assert_eq!(read_back.rectangles[0].payload, vec![0, 5, 0, 7]);
    }

    #[tokio::test]
    async fn zrle_payload_keeps_length_prefix() {
        let pf = PixelFormat::bgra8888();
        let compressed = vec![0x78, 0x9C, 1, 2, 3];
        let mut payload = (compressed.len() as u32).to_be_bytes().to_vec();
        payload.extend_from_slice(&compressed);

        let original = FramebufferUpdate {
            rectangles: vec![EncodedRectangle {
                header: header(64, 64, EncodingType::Zrle),
                payload: payload.clone(),
            }],
        };

        let bytes = wire_bytes(&original).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let read_back = FramebufferUpdate::read_from(&mut stream, &pf).await.unwrap();

        assert_eq!(read_back.rectangles[0].payload, payload);
    }

    #[tokio::test]
    async fn zrle_zero_length_payload_is_just_the_prefix() {
        let pf = PixelFormat::bgra8888();
        let original = FramebufferUpdate {
            rectangles: vec![EncodedRectangle {
                header: header(16, 16, EncodingType::Zrle),
                payload: vec![0, 0, 0, 0],
            }],
        };

        let bytes = wire_bytes(&original).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let read_back = FramebufferUpdate::read_from(&mut stream, &pf).await.unwrap();

        assert_eq!(read_back.rectangles[0].payload, vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn rectangles_preserve_wire_order() {
        let pf = PixelFormat::bgra8888();
        let original = FramebufferUpdate {
            rectangles: vec![
                EncodedRectangle {
                    header: header(1, 1, EncodingType::Raw),
                    payload: vec![1, 2, 3, 4],
                },
                EncodedRectangle {
                    header: header(2, 2, EncodingType::CopyRect),
                    payload: vec![0, 0, 0, 0],
                },
                EncodedRectangle {
                    header: header(1, 2, EncodingType::Raw),
                    payload: vec![9; 8],
                },
            ],
        };

        let bytes = wire_bytes(&original).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let read_back = FramebufferUpdate::read_from(&mut stream, &pf).await.unwrap();

        assert_eq!(original, read_back);
    }

    #[tokio::test]
    async fn truncated_payload_is_transport_error() {
        let pf = PixelFormat::bgra8888();
        // One raw 2x2 rectangle (16 payload bytes expected), only 8 sent.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u16.to_be_bytes());
        let mut out = RfbOutStream::new(&mut bytes);
        header(2, 2, EncodingType::Raw).write_to(&mut out);
        out.write_bytes(&[0u8; 8]);
        out.flush().await.unwrap();

        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let result = FramebufferUpdate::read_from(&mut stream, &pf).await;
        assert!(matches!(result, Err(ProtocolError::Transport(_))));
    }

    #[tokio::test]
    async fn unsupported_encoding_ends_the_read() {
        let pf = PixelFormat::bgra8888();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u16.to_be_bytes());
        let mut out = RfbOutStream::new(&mut bytes);
        // Raw rectangle first, then a Hextile (5) rectangle whose payload
        // length is unknowable; a third rectangle follows but must not be
        // parsed.
        header(1, 1, EncodingType::Raw).write_to(&mut out);
        out.write_bytes(&[1, 2, 3, 4]);
        header(8, 8, EncodingType::Unsupported(5)).write_to(&mut out);
        out.write_bytes(&[0xFF; 32]);
        out.flush().await.unwrap();

        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let update = FramebufferUpdate::read_from(&mut stream, &pf).await.unwrap();

        assert_eq!(update.rectangles.len(), 2);
        assert_eq!(
            update.rectangles[1].header.encoding,
            EncodingType::Unsupported(5)
        );
        assert!(update.rectangles[1].payload.is_empty());
    }

    #[tokio::test]
    async fn empty_update() {
        let pf = PixelFormat::bgra8888();
        let bytes = 0u16.to_be_bytes().to_vec();
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let update = FramebufferUpdate::read_from(&mut stream, &pf).await.unwrap();
        assert!(update.rectangles.is_empty());
    }

    #[tokio::test]
    async fn zero_area_raw_rectangle_has_empty_payload() {
        let pf = PixelFormat::bgra8888();
        let original = FramebufferUpdate {
            rectangles: vec![EncodedRectangle {
                header: header(0, 64, EncodingType::Raw),
                payload: Vec::new(),
            }],
        };

        let bytes = wire_bytes(&original).await;
        let mut stream = RfbInStream::new(Cursor::new(bytes));
        let read_back = FramebufferUpdate::read_from(&mut stream, &pf).await.unwrap();
        assert!(read_back.rectangles[0].payload.is_empty());
    }
}
