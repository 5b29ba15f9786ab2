//! Length-prefixed message framing for the stream socket
//!
//! Every application message travels as `[header][body]`, where the header is a
//! fixed-width big-endian unsigned integer holding the body length. The header
//! width is agreed out-of-band by both peers and never negotiated on the wire.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::errors::FrameError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Header width used when the deployment does not specify one
pub const DEFAULT_HEADER_LENGTH: usize = 4;

/// Size of the scratch buffer the body read loop fills per read
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Upper bound on body bytes reserved before any of them arrive
const MAX_PREALLOCATION: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Frame Codec
// ----------------------------------------------------------------------------

/// Encodes and decodes `[big-endian length][body]` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    header_length: usize,
    read_chunk: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            header_length: DEFAULT_HEADER_LENGTH,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

impl FrameCodec {
    /// Create a codec with the given header width (1..=8 bytes)
    pub fn new(header_length: usize) -> Result<Self, FrameError> {
        if !(1..=8).contains(&header_length) {
            return Err(FrameError::InvalidHeaderLength(header_length));
        }
        Ok(Self {
            header_length,
            read_chunk: DEFAULT_READ_CHUNK,
        })
    }

    /// Set the per-read scratch buffer size used by [`FrameCodec::read_frame`]
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }

    pub fn header_length(&self) -> usize {
        self.header_length
    }

    /// Largest body length representable in the header
    pub fn max_body_len(&self) -> u64 {
        if self.header_length >= 8 {
            u64::MAX
        } else {
            (1u64 << (8 * self.header_length)) - 1
        }
    }

    /// Encode `body` as a complete frame
    pub fn encode(&self, body: &[u8]) -> Result<Bytes, FrameError> {
        let mut dst = BytesMut::with_capacity(self.header_length + body.len());
        self.encode_into(body, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Append the frame for `body` to `dst`
    pub fn encode_into(&self, body: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = body.len() as u64;
        if len > self.max_body_len() {
            return Err(FrameError::BodyTooLarge {
                size: body.len(),
                header_length: self.header_length,
            });
        }
        let be = len.to_be_bytes();
        dst.reserve(self.header_length + body.len());
        dst.extend_from_slice(&be[8 - self.header_length..]);
        dst.extend_from_slice(body);
        Ok(())
    }

    fn read_len(&self, header: &[u8]) -> Result<usize, FrameError> {
        let mut be = [0u8; 8];
        be[8 - self.header_length..].copy_from_slice(&header[..self.header_length]);
        let len = u64::from_be_bytes(be);
        usize::try_from(len).map_err(|_| FrameError::LengthOverflow(len))
    }

    /// Read one frame from a byte stream
    ///
    /// Returns `Ok(None)` when the stream ends before any header byte arrives.
    /// A stream that ends part-way through a header or body is an error.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Bytes>, FrameError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; 8];
        let mut filled = 0;
        while filled < self.header_length {
            let n = reader.read(&mut header[filled..self.header_length]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FrameError::Truncated {
                    read: filled,
                    expected: self.header_length,
                });
            }
            filled += n;
        }

        let len = self.read_len(&header)?;
        trace!("Receiving frame of {} bytes", len);

        let mut body = BytesMut::with_capacity(len.min(MAX_PREALLOCATION));
        let mut scratch = vec![0u8; self.read_chunk.min(len).max(1)];
        while body.len() < len {
            let want = scratch.len().min(len - body.len());
            let n = reader.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Err(FrameError::Truncated {
                    read: body.len(),
                    expected: len,
                });
            }
            body.extend_from_slice(&scratch[..n]);
        }

        Ok(Some(body.freeze()))
    }
}

// ----------------------------------------------------------------------------
// tokio-util codec integration
// ----------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < self.header_length {
            return Ok(None);
        }
        let len = self.read_len(&src[..self.header_length])?;
        let needed = self
            .header_length
            .checked_add(len)
            .ok_or(FrameError::LengthOverflow(len as u64))?;
        if src.len() < needed {
            src.reserve((needed - src.len()).min(MAX_PREALLOCATION));
            return Ok(None);
        }
        src.advance(self.header_length);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_into(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[test]
    fn test_encode_default_header() {
        let codec = FrameCodec::default();
        let frame = codec.encode(&[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 3, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_encode_rejects_body_larger_than_header() {
        let codec = FrameCodec::new(1).unwrap();
        assert!(codec.encode(&[0u8; 255]).is_ok());
        assert!(matches!(
            codec.encode(&[0u8; 256]),
            Err(FrameError::BodyTooLarge { size: 256, header_length: 1 })
        ));
    }

    #[test]
    fn test_invalid_header_length() {
        assert!(FrameCodec::new(0).is_err());
        assert!(FrameCodec::new(9).is_err());
        assert_eq!(FrameCodec::new(8).unwrap().max_body_len(), u64::MAX);
        assert_eq!(FrameCodec::new(2).unwrap().max_body_len(), 0xFFFF);
    }

    #[tokio::test]
    async fn test_read_frame_roundtrip_across_partial_reads() {
        let codec = FrameCodec::new(2).unwrap().with_read_chunk(3);
        let body: Vec<u8> = (0..200u8).collect();
        let frame = codec.encode(&body).unwrap();

        let (mut client, mut server) = tokio::io::duplex(7);
        let writer = tokio::spawn(async move {
            client.write_all(&frame).await.unwrap();
            client.shutdown().await.unwrap();
        });

        let decoded = codec.read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(&decoded[..], &body[..]);
        assert!(codec.read_frame(&mut server).await.unwrap().is_none());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_empty_body() {
        let codec = FrameCodec::default();
        let frame = codec.encode(&[]).unwrap();
        let mut reader = &frame[..];
        let decoded = codec.read_frame(&mut reader).await.unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn test_clean_eof_is_no_frame() {
        let codec = FrameCodec::default();
        let mut reader: &[u8] = &[];
        assert!(codec.read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_header_is_error() {
        let codec = FrameCodec::default();
        let mut reader: &[u8] = &[0, 0];
        assert!(matches!(
            codec.read_frame(&mut reader).await,
            Err(FrameError::Truncated { read: 2, expected: 4 })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_body_is_error() {
        let codec = FrameCodec::default();
        let mut reader: &[u8] = &[0, 0, 0, 5, b'a', b'b'];
        assert!(matches!(
            codec.read_frame(&mut reader).await,
            Err(FrameError::Truncated { read: 2, expected: 5 })
        ));
    }

    #[tokio::test]
    async fn test_framed_codec_roundtrip() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, FrameCodec::default());
        let mut stream = FramedRead::new(server, FrameCodec::default());

        sink.send(Bytes::from_static(b"hello")).await.unwrap();
        sink.send(Bytes::from_static(b"")).await.unwrap();
        sink.send(Bytes::from_static(b"world")).await.unwrap();
        drop(sink);

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"world"));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_decoder_waits_for_complete_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 4, b'a'][..]);
        assert!(Decoder::decode(&mut codec, &mut buf).unwrap().is_none());
        buf.extend_from_slice(b"bcd");
        let frame = Decoder::decode(&mut codec, &mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"abcd");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_rejects_length_past_usize() {
        let mut codec = FrameCodec::new(8).unwrap();
        let mut buf = BytesMut::from(&[0xFFu8; 8][..]);
        assert!(matches!(
            Decoder::decode(&mut codec, &mut buf),
            Err(FrameError::LengthOverflow(_))
        ));
    }

    #[test]
    fn test_decoder_bounds_reservation_for_huge_header() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[0xFFu8, 0xFF, 0xFF, 0xFF][..]);
        assert!(Decoder::decode(&mut codec, &mut buf).unwrap().is_none());
        assert!(buf.capacity() < 2 * MAX_PREALLOCATION);
        assert_eq!(buf.len(), 4);
    }
}
