//! Compression fixtures shared by the encoding tests.

use flate2::write::ZlibEncoder;
use flate2::{Compress, Compression, FlushCompress};
use std::io::Write;

/// Compress tile data as a complete zlib stream and prepend the length
/// prefix, producing a self-contained ZRLE rectangle payload.
pub(crate) fn zrle_payload(tile_data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(tile_data).unwrap();
    with_prefix(&encoder.finish().unwrap())
}

/// Compress with a sync flush, leaving the zlib stream open the way a
/// live server's per-session compressor does.
pub(crate) fn sync_compress(data: &[u8]) -> Vec<u8> {
    let mut compressor = Compress::new(Compression::default(), true);
    let mut out = Vec::with_capacity(data.len() + 1024);
    compressor
        .compress_vec(data, &mut out, FlushCompress::Sync)
        .unwrap();
    out
}

/// Prepend the 4-byte big-endian length field a ZRLE rectangle payload
/// carries on the wire.
pub(crate) fn with_prefix(compressed: &[u8]) -> Vec<u8> {
    let mut payload = (compressed.len() as u32).to_be_bytes().to_vec();
    payload.extend_from_slice(compressed);
    payload
}
