//! Buffered I/O streams for RFB protocol communication.
//!
//! All multi-byte integers on an RFB connection are network byte order
//! (big-endian). [`RfbInStream`] and [`RfbOutStream`] wrap an async
//! reader/writer with an internal [`BytesMut`] buffer so that the many
//! small field reads a protocol parser performs do not each hit the
//! transport.
//!
//! Reads may suspend on the transport; there is no implicit timeout.
//! Cancellation is the caller's concern (wrap the whole message read in a
//! deadline if one is needed).

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Buffered input stream for reading RFB protocol data.
///
/// Integer accessors decode network byte order. [`read_exact_vec`] is the
/// bulk-payload primitive: it allocates and fills a buffer of exactly the
/// requested size, failing with `UnexpectedEof` on a short read.
///
/// [`read_exact_vec`]: Self::read_exact_vec
pub struct RfbInStream<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> RfbInStream<R> {
    /// Create a new input stream with the default buffer size (8KB).
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_BUFFER_SIZE)
    }

    /// Create a new input stream with the given initial buffer capacity.
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Pull from the transport until `needed` bytes are buffered.
    async fn fill_to(&mut self, needed: usize) -> std::io::Result<()> {
        while self.buffer.len() < needed {
            self.buffer.reserve(needed - self.buffer.len());
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "stream ended with {} of {} bytes buffered",
                        self.buffer.len(),
                        needed
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Take the next `N` buffered bytes as a fixed-size array.
    async fn read_array<const N: usize>(&mut self) -> std::io::Result<[u8; N]> {
        self.fill_to(N).await?;
        let mut bytes = [0u8; N];
        self.buffer.copy_to_slice(&mut bytes);
        Ok(bytes)
    }

    /// Read a single byte.
    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        Ok(self.read_array::<1>().await?[0])
    }

    /// Read a 16-bit unsigned integer in network byte order.
    pub async fn read_u16(&mut self) -> std::io::Result<u16> {
        Ok(u16::from_be_bytes(self.read_array().await?))
    }

    /// Read a 32-bit unsigned integer in network byte order.
    pub async fn read_u32(&mut self) -> std::io::Result<u32> {
        Ok(u32::from_be_bytes(self.read_array().await?))
    }

    /// Read a 32-bit signed integer in network byte order.
    pub async fn read_i32(&mut self) -> std::io::Result<i32> {
        Ok(i32::from_be_bytes(self.read_array().await?))
    }

    /// Read exactly `buf.len()` bytes into the provided buffer.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.fill_to(buf.len()).await?;
        self.buffer.copy_to_slice(buf);
        Ok(())
    }

    /// Read exactly `n` bytes into a freshly allocated buffer.
    pub async fn read_exact_vec(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_bytes(&mut buf).await?;
        Ok(buf)
    }

    /// Skip `n` bytes (padding, ignored fields).
    pub async fn skip(&mut self, n: usize) -> std::io::Result<()> {
        self.fill_to(n).await?;
        self.buffer.advance(n);
        Ok(())
    }

    /// Number of bytes readable without touching the transport.
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the stream and return the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Buffered output stream for writing RFB protocol data.
///
/// Writes are buffered; nothing reaches the transport until
/// [`flush`](Self::flush) is called.
pub struct RfbOutStream<W> {
    writer: W,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> RfbOutStream<W> {
    /// Create a new output stream with the default buffer size (8KB).
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    /// Write a 16-bit unsigned integer in network byte order.
    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Write a 32-bit unsigned integer in network byte order.
    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Write a 32-bit signed integer in network byte order.
    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Write a byte slice.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Flush all buffered data to the underlying writer.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        let pending = self.buffer.split();
        if !pending.is_empty() {
            self.writer.write_all(&pending).await?;
        }
        self.writer.flush().await
    }

    /// Number of bytes buffered but not yet flushed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the stream and return the underlying writer.
    ///
    /// Buffered data is discarded; call [`flush`](Self::flush) first.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn read_primitives() {
        let data = vec![42u8, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0xFF, 0xFF, 0xFE];
        let mut stream = RfbInStream::new(Cursor::new(data));

        assert_eq!(stream.read_u8().await.unwrap(), 42);
        assert_eq!(stream.read_u16().await.unwrap(), 0x1234);
        assert_eq!(stream.read_u32().await.unwrap(), 0xDEADBEEF);
        assert_eq!(stream.read_i32().await.unwrap(), -2);
    }

    #[tokio::test]
    async fn read_exact_vec_and_skip() {
        let data = vec![1, 2, 3, 4, 5, 6];
        let mut stream = RfbInStream::new(Cursor::new(data));

        stream.skip(2).await.unwrap();
        assert_eq!(stream.read_exact_vec(3).await.unwrap(), vec![3, 4, 5]);
        assert_eq!(stream.read_u8().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn short_read_is_unexpected_eof() {
        let data = vec![1, 2];
        let mut stream = RfbInStream::new(Cursor::new(data));

        let result = stream.read_u32().await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn read_exact_vec_short_is_unexpected_eof() {
        let data = vec![1, 2, 3];
        let mut stream = RfbInStream::new(Cursor::new(data));

        let result = stream.read_exact_vec(10).await;
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn write_primitives() {
        let mut buffer = Vec::new();
        let mut stream = RfbOutStream::new(&mut buffer);

        stream.write_u8(7);
        stream.write_u16(0x1234);
        stream.write_u32(0xCAFEBABE);
        stream.write_i32(-224);
        stream.write_bytes(b"rfb");
        assert_eq!(stream.buffered(), 14);
        stream.flush().await.unwrap();
        assert_eq!(stream.buffered(), 0);

        assert_eq!(
            buffer,
            vec![7, 0x12, 0x34, 0xCA, 0xFE, 0xBA, 0xBE, 0xFF, 0xFF, 0xFF, 0x20, b'r', b'f', b'b']
        );
    }

    #[tokio::test]
    async fn round_trip() {
        let mut buffer = Vec::new();
        {
            let mut out = RfbOutStream::new(&mut buffer);
            out.write_u16(640);
            out.write_u32(16);
            out.write_bytes(&[9, 9, 9]);
            out.flush().await.unwrap();
        }

        let mut inp = RfbInStream::new(Cursor::new(&buffer));
        assert_eq!(inp.read_u16().await.unwrap(), 640);
        assert_eq!(inp.read_u32().await.unwrap(), 16);
        assert_eq!(inp.read_exact_vec(3).await.unwrap(), vec![9, 9, 9]);
    }
}
