//! SECIO handshake records and their fixed32 big-endian framing.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetworkError;

/// Largest handshake record accepted from the remote.
pub const MAX_HANDSHAKE_RECORD: usize = 64 * 1024;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Propose {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub rand: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub pubkey: Option<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub exchanges: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub ciphers: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub hashes: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Exchange {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub epubkey: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
}

/// Write `body` behind a 4-byte big-endian length.
pub async fn write_fixed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), NetworkError> {
    let len = u32::try_from(body.len())
        .map_err(|_| NetworkError::Framing(format!("record of {} bytes too large", body.len())))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one fixed32-framed record of at most `max` bytes.
pub async fn read_fixed<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<u8>, NetworkError> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(NetworkError::Closed),
        Err(e) => return Err(e.into()),
    };
    if len > max {
        return Err(NetworkError::Framing(format!(
            "record of {} bytes exceeds {}",
            len, max
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => NetworkError::Framing("truncated record".into()),
        _ => NetworkError::Io(e),
    })?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[tokio::test]
    async fn test_fixed_framing() {
        let mut buf = Vec::new();
        write_fixed(&mut buf, b"hello").await.unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);

        let mut reader = buf.as_slice();
        assert_eq!(read_fixed(&mut reader, 16).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_fixed_limit() {
        let mut buf = Vec::new();
        write_fixed(&mut buf, &[0u8; 32]).await.unwrap();
        let mut reader = buf.as_slice();
        assert!(matches!(
            read_fixed(&mut reader, 16).await,
            Err(NetworkError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_fixed_eof_is_closed() {
        let mut reader: &[u8] = &[];
        assert!(read_fixed(&mut reader, 16).await.unwrap_err().is_closed());
    }

    #[test]
    fn test_propose_field_numbers() {
        let propose = Propose {
            rand: Some(vec![1]),
            pubkey: None,
            exchanges: Some("X25519".into()),
            ciphers: None,
            hashes: None,
        };
        let encoded = propose.encode_to_vec();
        // tag 1 bytes, then tag 3 string.
        assert_eq!(encoded[0], 0x0a);
        assert_eq!(encoded[3], 0x1a);
        assert_eq!(Propose::decode(encoded.as_slice()).unwrap(), propose);
    }
}
