//! Routing of encoded rectangles through the right decoder.
//!
//! Most encodings on this path need no byte-level work: Raw payloads are
//! already client-layout pixels and CopyRect is a 4-byte instruction.
//! ZRLE is the exception and goes through the session's [`ZrleDecoder`].
//!
//! The converter deliberately degrades instead of failing: a missing
//! decoder or a decode error produces a passthrough rectangle and a
//! warning, keeping the rectangle stream alive for diagnostics. A ZRLE
//! decode failure still means the session's zlib stream is out of sync,
//! so callers should treat it as a teardown signal; re-creating the
//! decoder here would only mask the corruption, which is why the
//! converter never does.

use crate::{DecodedRectangle, EncodedRectangle, EncodingType, ZrleDecoder};

/// Maps encoded rectangles to decoded ones, holding the session's ZRLE
/// decoder if one is configured.
#[derive(Debug, Default)]
pub struct RectangleConverter {
    zrle: Option<ZrleDecoder>,
}

impl RectangleConverter {
    /// A converter with no ZRLE decoder; ZRLE rectangles pass through
    /// undecoded (with a warning).
    pub fn new() -> Self {
        Self { zrle: None }
    }

    /// A converter decoding ZRLE with the given session decoder.
    pub fn with_zrle(decoder: ZrleDecoder) -> Self {
        Self {
            zrle: Some(decoder),
        }
    }

    /// Convert one rectangle.
    ///
    /// Raw, CopyRect and unsupported rectangles pass through unchanged.
    /// ZRLE rectangles decode to [`EncodingType::Raw`] pixels; on any
    /// decoder problem the original payload passes through with its
    /// original encoding tag.
    pub fn convert(&mut self, rect: &EncodedRectangle) -> DecodedRectangle {
        match rect.header.encoding {
            EncodingType::Raw | EncodingType::CopyRect | EncodingType::Unsupported(_) => {
                DecodedRectangle::passthrough(rect)
            }
            EncodingType::Zrle => self.convert_zrle(rect),
        }
    }

    fn convert_zrle(&mut self, rect: &EncodedRectangle) -> DecodedRectangle {
        let Some(decoder) = self.zrle.as_mut() else {
            tracing::warn!(
                x = rect.header.x,
                y = rect.header.y,
                "ZRLE rectangle received with no decoder configured"
            );
            return DecodedRectangle::passthrough(rect);
        };

        match decoder.decode(&rect.payload, rect.header.width, rect.header.height) {
            Ok(pixels) => DecodedRectangle {
                x: rect.header.x,
                y: rect.header.y,
                width: rect.header.width,
                height: rect.header.height,
                encoding: EncodingType::Raw,
                pixels,
            },
            Err(err) => {
                tracing::warn!(
                    x = rect.header.x,
                    y = rect.header.y,
                    width = rect.header.width,
                    height = rect.header.height,
                    error = %err,
                    "ZRLE decode failed, passing rectangle through"
                );
                DecodedRectangle::passthrough(rect)
            }
        }
    }
}
