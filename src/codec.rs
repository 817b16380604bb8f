//! Length-delimited postcard framing for peer connections.

use std::io;
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Frames postcard-encoded values of `T` over a byte transport.
///
/// Each frame is a length prefix followed by the postcard encoding of one
/// value. Frames larger than 16 MiB are rejected.
#[derive(Debug)]
pub struct PeerCodec<T> {
    inner: LengthDelimitedCodec,
    _marker: PhantomData<T>,
}

impl<T> PeerCodec<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LENGTH)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for PeerCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PeerCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Serialize> Encoder<T> for PeerCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = postcard::to_stdvec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(Bytes::from(bytes), dst)
    }
}

impl<T> Decoder for PeerCodec<T>
where
    T: for<'de> Deserialize<'de>,
{
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let item = postcard::from_bytes(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_frame() {
        let mut codec: PeerCodec<(u32, String)> = PeerCodec::new();
        let mut buf = BytesMut::new();

        codec.encode((7, "hello".to_owned()), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, (7, "hello".to_owned()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame_waits() {
        let mut codec: PeerCodec<(u32, String)> = PeerCodec::new();
        let mut buf = BytesMut::new();
        codec.encode((1, "partial".to_owned()), &mut buf).unwrap();

        let mut truncated = buf.split_to(buf.len() - 2);
        assert!(codec.decode(&mut truncated).unwrap().is_none());

        truncated.unsplit(buf);
        assert!(codec.decode(&mut truncated).unwrap().is_some());
    }

    #[test]
    fn test_decode_garbage_is_invalid_data() {
        let mut codec: PeerCodec<(u32, String)> = PeerCodec::new();
        let mut buf = BytesMut::new();

        // Valid length prefix, body that is not a postcard (u32, String).
        encode_raw(&mut buf, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    fn encode_raw(buf: &mut BytesMut, body: &[u8]) {
        let mut inner = LengthDelimitedCodec::new();
        inner.encode(Bytes::copy_from_slice(body), buf).unwrap();
    }
}
