//! # Wire Framing
//!
//! Every message on a transport connection is one frame:
//!
//! ```text
//! u32_be(len) || bincode(message)        (len <= MAX_FRAME_LEN)
//! ```
//!
//! Reading exactly `len` bytes after the prefix means no delimiter scanning
//! and no partial-message buffering. A clean EOF between frames is the peer
//! hanging up; an EOF inside a frame is an error.

use std::io;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_FRAME_LEN;

/// Errors reading or writing a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("frame of {0} bytes exceeds the limit of {max} bytes", max = MAX_FRAME_LEN)]
    FrameTooLarge(usize),

    #[error("malformed message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),
}

/// Read one frame. Returns `Ok(None)` on a clean EOF before the prefix.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let message = bincode::deserialize(&buf).map_err(CodecError::Decode)?;
    Ok(Some(message))
}

/// Write one frame into `writer`. Does not flush; callers decide when the
/// buffered frames go out.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(message).map_err(CodecError::Encode)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(bytes.len()));
    }
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abci::types::{Request, RequestDeliverTx, RequestEcho};

    #[tokio::test]
    async fn frames_cross_a_byte_stream_in_order() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = vec![
            Request::Echo(RequestEcho {
                message: "ping".into(),
            }),
            Request::DeliverTx(RequestDeliverTx {
                tx: b"k=v".to_vec(),
            }),
            Request::Commit,
        ];

        for req in &sent {
            write_message(&mut client, req).await.expect("write");
        }
        client.flush().await.unwrap();
        drop(client);

        let mut received = Vec::new();
        while let Some(req) = read_message::<_, Request>(&mut server).await.expect("read") {
            received.push(req);
        }
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected_before_allocating() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(u32::MAX).await.unwrap();

        let err = read_message::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(10).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_message::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
    }

    #[tokio::test]
    async fn garbage_payload_is_a_decode_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(4).await.unwrap();
        client.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let err = read_message::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
