//! Varint-prefixed line messages.
//!
//! Wire format: `varint(len(payload) + 1) ‖ payload ‖ '\n'`. This is the
//! framing used by multistream-select for protocol names. Synchronous helpers
//! work on `std::io` streams; the async helpers work on tokio streams and
//! honour a [`CancelToken`].

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::cancel::CancelToken;
use crate::error::CoreError;

/// Largest message the channel will read. Protocol names are tiny; this only
/// bounds what a misbehaving peer can make us allocate.
pub const MAX_MESSAGE_LEN: u64 = 64 * 1024;

/// Maximum bytes in an encoded u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

const TERMINATOR: u8 = b'\n';

/// Encode `message` into a fresh buffer using the channel framing.
pub fn encode(message: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(message.len() + MAX_VARINT_LEN + 1);
    prost::encoding::encode_varint(message.len() as u64 + 1, &mut buf);
    buf.put_slice(message);
    buf.put_u8(TERMINATOR);
    buf
}

fn decode_varint_bytes(bytes: &[u8]) -> Result<u64, CoreError> {
    let mut slice = bytes;
    prost::encoding::decode_varint(&mut slice)
        .map_err(|e| CoreError::Framing(format!("invalid varint: {}", e)))
}

fn check_len(prefix: u64) -> Result<usize, CoreError> {
    if prefix == 0 {
        return Err(CoreError::Framing("zero length prefix".into()));
    }
    if prefix > MAX_MESSAGE_LEN + 1 {
        return Err(CoreError::MessageTooLarge {
            len: prefix - 1,
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok((prefix - 1) as usize)
}

fn strip_terminator(mut body: Vec<u8>) -> Result<Vec<u8>, CoreError> {
    match body.pop() {
        Some(TERMINATOR) => Ok(body),
        _ => Err(CoreError::Framing("missing message terminator".into())),
    }
}

/// Read an unsigned varint from a blocking reader.
///
/// End of stream before the first byte yields [`CoreError::Closed`]; end of
/// stream in the middle of the varint is a framing error.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64, CoreError> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    for i in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte)? == 0 {
            return Err(if i == 0 {
                CoreError::Closed
            } else {
                CoreError::Framing("stream ended inside varint".into())
            });
        }
        buf[i] = byte[0];
        if byte[0] & 0x80 == 0 {
            return decode_varint_bytes(&buf[..=i]);
        }
    }
    Err(CoreError::Framing("varint longer than 10 bytes".into()))
}

/// Read an unsigned varint from an async reader.
pub async fn read_varint_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64, CoreError> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    for i in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte).await? == 0 {
            return Err(if i == 0 {
                CoreError::Closed
            } else {
                CoreError::Framing("stream ended inside varint".into())
            });
        }
        buf[i] = byte[0];
        if byte[0] & 0x80 == 0 {
            return decode_varint_bytes(&buf[..=i]);
        }
    }
    Err(CoreError::Framing("varint longer than 10 bytes".into()))
}

/// Read one message payload from a blocking reader.
pub fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, CoreError> {
    let len = check_len(read_varint(reader)?)?;
    let mut body = vec![0u8; len + 1];
    reader.read_exact(&mut body).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => CoreError::Framing("truncated message".into()),
        _ => CoreError::Io(e),
    })?;
    strip_terminator(body)
}

/// Read one message as a UTF-8 string from a blocking reader.
pub fn read_string<R: Read>(reader: &mut R) -> Result<String, CoreError> {
    Ok(String::from_utf8(read_bytes(reader)?)?)
}

/// Write one message to a blocking writer and flush it.
pub fn write<W: Write>(message: &str, writer: &mut W) -> Result<(), CoreError> {
    writer.write_all(&encode(message.as_bytes()))?;
    writer.flush()?;
    Ok(())
}

async fn read_bytes_inner<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, CoreError> {
    let len = check_len(read_varint_async(reader).await?)?;
    let mut body = vec![0u8; len + 1];
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => CoreError::Framing("truncated message".into()),
        _ => CoreError::Io(e),
    })?;
    strip_terminator(body)
}

/// Read one message payload, aborting if `cancel` fires.
///
/// Cancellation is checked before any byte is consumed. If it fires while a
/// read is in flight the read is dropped and `Cancelled` is returned; the
/// stream may then be positioned mid-message and should be discarded.
pub async fn read_bytes_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    cancel: &CancelToken,
) -> Result<Vec<u8>, CoreError> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        result = read_bytes_inner(reader) => result,
    }
}

/// Read one message as a UTF-8 string, aborting if `cancel` fires.
pub async fn read_string_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    cancel: &CancelToken,
) -> Result<String, CoreError> {
    Ok(String::from_utf8(read_bytes_async(reader, cancel).await?)?)
}

/// Write one message and flush it, aborting if `cancel` fires first.
pub async fn write_async<W: AsyncWrite + Unpin>(
    message: &str,
    writer: &mut W,
    cancel: &CancelToken,
) -> Result<(), CoreError> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    let frame = encode(message.as_bytes());
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        result = async {
            writer.write_all(&frame).await?;
            writer.flush().await?;
            Ok::<(), CoreError>(())
        } => result,
    }
}
