//! ZRLE decoding - zlib-compressed run-length encoding in 64x64 tiles.
//!
//! ZRLE (encoding type 16) wraps a tiled run-length format in zlib. Each
//! rectangle's payload is:
//!
//! ```text
//! +------------------+
//! | length           |  4 bytes (u32 big-endian)
//! +------------------+
//! | zlib data        |  'length' bytes of the session's zlib stream
//! +------------------+
//! ```
//!
//! The zlib stream is continuous for the whole session: only the first
//! rectangle starts with a zlib header, and every later rectangle carries
//! raw continuation data for the same inflate state. Finalising or
//! re-creating the inflater between rectangles corrupts everything that
//! follows, which is why [`ZrleDecoder`] is a stateful, session-scoped
//! object with an explicit [`reset`](ZrleDecoder::reset) for session
//! boundaries only.
//!
//! After inflation the data is a sequence of tiles covering the rectangle
//! in row-major order, 64 pixels per side except at the right and bottom
//! edges. Each tile opens with a subencoding byte:
//!
//! ```text
//!  0         raw: tile_w * tile_h CPIXELs in raster order
//!  1         solid: one CPIXEL filling the tile
//!  2..127    packed palette: that many CPIXELs, then bit-packed indices
//!  128       plain RLE: (CPIXEL, run length) pairs
//!  129       reserved, never valid
//!  130..255  palette RLE: (value - 128) CPIXELs, then coded runs
//! ```
//!
//! A CPIXEL is the compact on-wire pixel: `ceil(depth / 8)` bytes, 3 for
//! the common 32bpp depth-24 formats. Widening a CPIXEL to a native pixel
//! is the only point where an alpha byte is produced; it is always 0xFF.
//!
//! Packed palette indices are MSB-first within each byte and every tile
//! row starts on a fresh byte. Run lengths are `1 + sum(bytes)`, where
//! bytes are read while they equal 255 plus one terminator below 255.

use crate::PixelFormat;
use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;

/// Tile stride in pixels; edge tiles are smaller.
const TILE_SIZE: u16 = 64;

/// Output chunk size for each inflate call.
const INFLATE_BUF_SIZE: usize = 64 * 1024;

/// Structural violation inside a ZRLE payload.
///
/// Any of these poisons the session: the continuous zlib stream cannot be
/// re-synchronised after a malformed rectangle, so the caller must tear
/// the connection down rather than retry.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Fewer bytes available than the structure requires.
    #[error("truncated ZRLE data: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// The payload's length prefix claims more bytes than were received.
    #[error("declared compressed length {declared} exceeds the {available} payload bytes")]
    DeclaredLength { declared: usize, available: usize },

    /// The zlib stream itself is corrupt.
    #[error("zlib inflate failed: {0}")]
    Inflate(#[from] flate2::DecompressError),

    /// Subencoding byte 129 is reserved.
    #[error("reserved ZRLE subencoding {0}")]
    UnknownSubencoding(u8),

    /// A palette reference beyond the palette actually sent.
    #[error("palette index {index} out of range (palette has {palette_size} entries)")]
    PaletteIndex { index: usize, palette_size: usize },

    /// A run that would write past the end of its tile.
    #[error("run of {run} pixels overruns tile ({remaining} pixels remaining)")]
    RunOverflow { run: usize, remaining: usize },
}

/// Stateful ZRLE decoder, one per session.
///
/// Owns the inflate state shared by every ZRLE rectangle of the session,
/// plus any decompressed bytes the zlib stream has yielded ahead of the
/// tile data consumed so far. Compressed payloads may be split between
/// rectangles at arbitrary byte positions, so one rectangle's chunk can
/// inflate to more than its own tiles; the surplus belongs to the next
/// rectangle and is kept until then.
pub struct ZrleDecoder {
    pixel_format: PixelFormat,
    bytes_per_pixel: usize,
    cpixel_size: usize,
    inflater: Decompress,
    /// Inflated bytes not yet consumed by tile parsing.
    pending: Vec<u8>,
}

impl ZrleDecoder {
    /// Create a decoder for a session negotiated with `pixel_format`.
    pub fn new(pixel_format: PixelFormat) -> Self {
        let bytes_per_pixel = pixel_format.bytes_per_pixel();
        let cpixel_size = pixel_format.cpixel_size();
        Self {
            pixel_format,
            bytes_per_pixel,
            cpixel_size,
            inflater: Decompress::new(true),
            pending: Vec::new(),
        }
    }

    /// Discard all zlib state, ready for a new session's stream.
    ///
    /// Never call this between rectangles of one session; the stream is
    /// continuous and resetting it mid-session corrupts every rectangle
    /// that follows.
    pub fn reset(&mut self) {
        self.inflater.reset(true);
        self.pending.clear();
    }

    /// Decode one ZRLE rectangle payload into client-layout pixels.
    ///
    /// `payload` is the full rectangle payload including the 4-byte
    /// length prefix. On success the returned buffer holds exactly
    /// `width * height * bytes_per_pixel` bytes, densely packed
    /// row-major, and the caller owns it.
    pub fn decode(
        &mut self,
        payload: &[u8],
        width: u16,
        height: u16,
    ) -> Result<Vec<u8>, FormatError> {
        if payload.len() < 4 {
            return Err(FormatError::Truncated {
                needed: 4,
                available: payload.len(),
            });
        }
        let declared =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let available = payload.len() - 4;
        if available < declared {
            return Err(FormatError::DeclaredLength {
                declared,
                available,
            });
        }

        let out_len = usize::from(width) * usize::from(height) * self.bytes_per_pixel;
        if declared == 0 {
            // Nothing entered the zlib stream for this rectangle.
            return Ok(vec![0u8; out_len]);
        }

        self.inflate(&payload[4..4 + declared])?;

        // Tile parsing consumes a prefix of the decompressed stream; the
        // tail (if the compressed split ran ahead) is kept for the next
        // rectangle.
        let buffered = std::mem::take(&mut self.pending);
        let mut cursor = TileCursor::new(&buffered);
        match self.decode_tiles(&mut cursor, width, height) {
            Ok(pixels) => {
                let consumed = cursor.pos;
                self.pending = buffered[consumed..].to_vec();
                tracing::debug!(
                    width,
                    height,
                    consumed,
                    carried = self.pending.len(),
                    "decoded ZRLE rectangle"
                );
                Ok(pixels)
            }
            Err(err) => {
                self.pending = buffered;
                Err(err)
            }
        }
    }

    /// Feed a compressed chunk to the session inflater and buffer all
    /// bytes it can produce. The stream is never finalised.
    fn inflate(&mut self, compressed: &[u8]) -> Result<(), FormatError> {
        let mut out_buf = vec![0u8; INFLATE_BUF_SIZE];
        let mut in_pos = 0;

        while in_pos < compressed.len() {
            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();

            let status = self.inflater.decompress(
                &compressed[in_pos..],
                &mut out_buf,
                FlushDecompress::Sync,
            )?;

            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;
            in_pos += consumed;
            self.pending.extend_from_slice(&out_buf[..produced]);

            match status {
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        // The remaining input is an incomplete deflate
                        // block; the rest arrives with a later rectangle.
                        break;
                    }
                }
                Status::StreamEnd => {
                    tracing::warn!(
                        consumed = in_pos,
                        total = compressed.len(),
                        "zlib stream ended inside a rectangle"
                    );
                    break;
                }
            }
        }

        tracing::trace!(
            compressed = compressed.len(),
            buffered = self.pending.len(),
            "inflated ZRLE chunk"
        );
        Ok(())
    }

    /// Walk the 64x64 tile grid in row-major order, decoding each tile
    /// into a freshly allocated output buffer.
    fn decode_tiles(
        &self,
        cursor: &mut TileCursor<'_>,
        width: u16,
        height: u16,
    ) -> Result<Vec<u8>, FormatError> {
        let out_len = usize::from(width) * usize::from(height) * self.bytes_per_pixel;
        let mut out = vec![0u8; out_len];

        let mut tile_y = 0u16;
        while tile_y < height {
            let tile_h = TILE_SIZE.min(height - tile_y);
            let mut tile_x = 0u16;
            while tile_x < width {
                let tile_w = TILE_SIZE.min(width - tile_x);
                self.decode_tile(cursor, &mut out, width, (tile_x, tile_y), (tile_w, tile_h))?;
                tile_x += TILE_SIZE;
            }
            tile_y += TILE_SIZE;
        }

        Ok(out)
    }

    fn decode_tile(
        &self,
        cursor: &mut TileCursor<'_>,
        out: &mut [u8],
        width: u16,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
    ) -> Result<(), FormatError> {
        let subencoding = cursor.read_u8()?;
        match subencoding {
            0 => self.raw_tile(cursor, out, width, tile_pos, tile_size),
            1 => self.solid_tile(cursor, out, width, tile_pos, tile_size),
            2..=127 => self.packed_palette_tile(
                cursor,
                out,
                width,
                tile_pos,
                tile_size,
                usize::from(subencoding),
            ),
            128 => self.plain_rle_tile(cursor, out, width, tile_pos, tile_size),
            129 => Err(FormatError::UnknownSubencoding(subencoding)),
            130..=255 => self.palette_rle_tile(
                cursor,
                out,
                width,
                tile_pos,
                tile_size,
                usize::from(subencoding - 128),
            ),
        }
    }

    /// Subencoding 0: uncompressed CPIXELs in raster order.
    fn raw_tile(
        &self,
        cursor: &mut TileCursor<'_>,
        out: &mut [u8],
        width: u16,
        tile_pos: (u16, u16),
        (tile_w, tile_h): (u16, u16),
    ) -> Result<(), FormatError> {
        for row in 0..usize::from(tile_h) {
            for col in 0..usize::from(tile_w) {
                let cpixel = cursor.read_slice(self.cpixel_size)?;
                self.put_cpixel(out, self.pixel_offset(width, tile_pos, row, col), cpixel);
            }
        }
        Ok(())
    }

    /// Subencoding 1: a single CPIXEL fills the tile.
    fn solid_tile(
        &self,
        cursor: &mut TileCursor<'_>,
        out: &mut [u8],
        width: u16,
        tile_pos: (u16, u16),
        (tile_w, tile_h): (u16, u16),
    ) -> Result<(), FormatError> {
        let cpixel = cursor.read_slice(self.cpixel_size)?;
        for row in 0..usize::from(tile_h) {
            for col in 0..usize::from(tile_w) {
                self.put_cpixel(out, self.pixel_offset(width, tile_pos, row, col), cpixel);
            }
        }
        Ok(())
    }

    /// Subencodings 2..127: a palette followed by bit-packed indices.
    ///
    /// Indices are MSB-first within each byte and each tile row is padded
    /// to a byte boundary; leftover bits never carry into the next row.
    fn packed_palette_tile(
        &self,
        cursor: &mut TileCursor<'_>,
        out: &mut [u8],
        width: u16,
        tile_pos: (u16, u16),
        (tile_w, tile_h): (u16, u16),
        palette_size: usize,
    ) -> Result<(), FormatError> {
        let palette = cursor.read_slice(palette_size * self.cpixel_size)?;
        let bits = packed_index_bits(palette_size);
        let mask = ((1u16 << bits) - 1) as u8;

        for row in 0..usize::from(tile_h) {
            let row_bytes = (usize::from(tile_w) * bits).div_ceil(8);
            let packed = cursor.read_slice(row_bytes)?;
            for col in 0..usize::from(tile_w) {
                let bit = col * bits;
                let shift = 8 - bits - bit % 8;
                let index = usize::from((packed[bit / 8] >> shift) & mask);
                if index >= palette_size {
                    return Err(FormatError::PaletteIndex {
                        index,
                        palette_size,
                    });
                }
                let cpixel = &palette[index * self.cpixel_size..(index + 1) * self.cpixel_size];
                self.put_cpixel(out, self.pixel_offset(width, tile_pos, row, col), cpixel);
            }
        }
        Ok(())
    }

    /// Subencoding 128: (CPIXEL, run length) pairs until the tile is full.
    fn plain_rle_tile(
        &self,
        cursor: &mut TileCursor<'_>,
        out: &mut [u8],
        width: u16,
        tile_pos: (u16, u16),
        (tile_w, tile_h): (u16, u16),
    ) -> Result<(), FormatError> {
        let area = usize::from(tile_w) * usize::from(tile_h);
        let mut filled = 0usize;

        while filled < area {
            let cpixel = cursor.read_slice(self.cpixel_size)?;
            let run = read_run_length(cursor)?;
            if run > area - filled {
                return Err(FormatError::RunOverflow {
                    run,
                    remaining: area - filled,
                });
            }
            for i in filled..filled + run {
                let (row, col) = (i / usize::from(tile_w), i % usize::from(tile_w));
                self.put_cpixel(out, self.pixel_offset(width, tile_pos, row, col), cpixel);
            }
            filled += run;
        }
        Ok(())
    }

    /// Subencodings 130..255: a palette followed by coded runs.
    ///
    /// Bit 7 of each code byte distinguishes a lone pixel (clear, run of
    /// one) from a run (set, variable-length count follows); the low
    /// seven bits index the palette.
    fn palette_rle_tile(
        &self,
        cursor: &mut TileCursor<'_>,
        out: &mut [u8],
        width: u16,
        tile_pos: (u16, u16),
        (tile_w, tile_h): (u16, u16),
        palette_size: usize,
    ) -> Result<(), FormatError> {
        let palette = cursor.read_slice(palette_size * self.cpixel_size)?;
        let area = usize::from(tile_w) * usize::from(tile_h);
        let mut filled = 0usize;

        while filled < area {
            let code = cursor.read_u8()?;
            let index = usize::from(code & 0x7F);
            let run = if code & 0x80 == 0 {
                1
            } else {
                read_run_length(cursor)?
            };

            if index >= palette_size {
                return Err(FormatError::PaletteIndex {
                    index,
                    palette_size,
                });
            }
            if run > area - filled {
                return Err(FormatError::RunOverflow {
                    run,
                    remaining: area - filled,
                });
            }

            let cpixel = &palette[index * self.cpixel_size..(index + 1) * self.cpixel_size];
            for i in filled..filled + run {
                let (row, col) = (i / usize::from(tile_w), i % usize::from(tile_w));
                self.put_cpixel(out, self.pixel_offset(width, tile_pos, row, col), cpixel);
            }
            filled += run;
        }
        Ok(())
    }

    fn pixel_offset(
        &self,
        width: u16,
        (tile_x, tile_y): (u16, u16),
        row: usize,
        col: usize,
    ) -> usize {
        ((usize::from(tile_y) + row) * usize::from(width) + usize::from(tile_x) + col)
            * self.bytes_per_pixel
    }

    /// Widen one CPIXEL to a native pixel at `offset`.
    ///
    /// The server never sends alpha; the bytes the CPIXEL does not cover
    /// are filled with 0xFF so the client surface stays opaque.
    fn put_cpixel(&self, out: &mut [u8], offset: usize, cpixel: &[u8]) {
        let dst = &mut out[offset..offset + self.bytes_per_pixel];
        if self.pixel_format.big_endian {
            let pad = self.bytes_per_pixel - self.cpixel_size;
            dst[..pad].fill(0xFF);
            dst[pad..].copy_from_slice(cpixel);
        } else {
            dst[..self.cpixel_size].copy_from_slice(cpixel);
            dst[self.cpixel_size..].fill(0xFF);
        }
    }
}

impl std::fmt::Debug for ZrleDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZrleDecoder")
            .field("pixel_format", &self.pixel_format)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Bits per packed palette index for a given palette size.
fn packed_index_bits(palette_size: usize) -> usize {
    match palette_size {
        0..=2 => 1,
        3..=4 => 2,
        5..=16 => 4,
        _ => 8,
    }
}

/// Run length is one plus the sum of its bytes: values of 255 continue
/// the count, the first byte below 255 terminates it.
fn read_run_length(cursor: &mut TileCursor<'_>) -> Result<usize, FormatError> {
    let mut length = 1usize;
    loop {
        let byte = cursor.read_u8()?;
        length = length.saturating_add(usize::from(byte));
        if byte != 0xFF {
            break;
        }
    }
    Ok(length)
}

/// Byte cursor over the decompressed tile stream.
struct TileCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TileCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, FormatError> {
        let slice = self.read_slice(1)?;
        Ok(slice[0])
    }

    fn read_slice(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < n {
            return Err(FormatError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}
