//! The encrypted stream SECIO installs once keys are agreed.
//!
//! Each packet is `u32 BE length ‖ ciphertext ‖ mac`, where the length
//! covers ciphertext and mac. The MAC is checked before decryption. Written
//! bytes are buffered and sent as one packet per flush.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use peernet_crypto::{CipherKind, HashKind, SessionCipher, SessionMac, StretchedKey};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::NetworkError;

/// Largest packet accepted from the remote.
pub const MAX_PACKET_SIZE: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Cipher and MAC state for one direction.
struct Direction {
    cipher: SessionCipher,
    mac: SessionMac,
}

impl Direction {
    fn new(cipher: CipherKind, hash: HashKind, key: &StretchedKey) -> Result<Self, NetworkError> {
        Ok(Self {
            cipher: SessionCipher::new(cipher, &key.cipher_key, &key.iv)?,
            mac: SessionMac::new(hash, &key.mac_key),
        })
    }
}

pub struct Secio1Stream<S> {
    inner: S,
    incoming: Direction,
    outgoing: Direction,
    read_buf: BytesMut,
    plaintext: BytesMut,
    inner_eof: bool,
    stage: Vec<u8>,
    packet: BytesMut,
}

impl<S> Secio1Stream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `inner`, encrypting with `local` keys and decrypting with `remote` ones.
    pub fn new(
        inner: S,
        cipher: CipherKind,
        hash: HashKind,
        local: &StretchedKey,
        remote: &StretchedKey,
    ) -> Result<Self, NetworkError> {
        Ok(Self {
            inner,
            incoming: Direction::new(cipher, hash, remote)?,
            outgoing: Direction::new(cipher, hash, local)?,
            read_buf: BytesMut::new(),
            plaintext: BytesMut::new(),
            inner_eof: false,
            stage: Vec::new(),
            packet: BytesMut::new(),
        })
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Pull one complete packet off `read_buf`, verify and decrypt it.
    fn decode_packet(&mut self) -> Result<bool, NetworkError> {
        if self.read_buf.len() < 4 {
            return Ok(false);
        }
        let len = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;
        let mac_size = self.incoming.mac.size();
        if len > MAX_PACKET_SIZE {
            return Err(NetworkError::Integrity(format!(
                "packet of {} bytes exceeds {}",
                len, MAX_PACKET_SIZE
            )));
        }
        if len <= mac_size {
            return Err(NetworkError::Integrity(format!(
                "packet length {} does not exceed mac size {}",
                len, mac_size
            )));
        }
        if self.read_buf.len() < 4 + len {
            return Ok(false);
        }
        self.read_buf.advance(4);
        let mut packet = self.read_buf.split_to(len);
        let tag = packet.split_off(len - mac_size);
        if !self.incoming.mac.verify(&packet, &tag) {
            return Err(NetworkError::Integrity("mac mismatch".into()));
        }
        self.incoming.cipher.apply_keystream(&mut packet);
        self.plaintext.unsplit(packet);
        Ok(true)
    }

    /// Encrypt the staged bytes into the outgoing packet buffer.
    fn seal_stage(&mut self) -> Result<(), NetworkError> {
        let mut ciphertext = std::mem::take(&mut self.stage);
        self.outgoing.cipher.apply_keystream(&mut ciphertext);
        let tag = self.outgoing.mac.sign(&ciphertext)?;
        let len = u32::try_from(ciphertext.len() + tag.len())
            .map_err(|_| NetworkError::Framing("packet too large".into()))?;
        self.packet.extend_from_slice(&len.to_be_bytes());
        self.packet.extend_from_slice(&ciphertext);
        self.packet.extend_from_slice(&tag);
        Ok(())
    }

    fn poll_write_packet(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.packet.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.packet))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.packet.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncRead for Secio1Stream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.plaintext.is_empty() {
                let n = this.plaintext.len().min(buf.remaining());
                buf.put_slice(&this.plaintext[..n]);
                this.plaintext.advance(n);
                return Poll::Ready(Ok(()));
            }
            if this.decode_packet().map_err(io::Error::from)? {
                continue;
            }
            if this.inner_eof {
                if this.read_buf.is_empty() {
                    return Poll::Ready(Ok(()));
                }
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a packet",
                )));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let mut chunk_buf = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk_buf))?;
            if chunk_buf.filled().is_empty() {
                this.inner_eof = true;
            } else {
                this.read_buf.extend_from_slice(chunk_buf.filled());
            }
        }
    }
}

impl<S> AsyncWrite for Secio1Stream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let max_plain = MAX_PACKET_SIZE - this.outgoing.mac.size();
        if this.stage.len() >= max_plain {
            ready!(this.poll_write_packet(cx))?;
            this.seal_stage().map_err(io::Error::from)?;
            ready!(this.poll_write_packet(cx))?;
        }
        let n = buf.len().min(max_plain - this.stage.len());
        this.stage.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_write_packet(cx))?;
        if !this.stage.is_empty() {
            this.seal_stage().map_err(io::Error::from)?;
            ready!(this.poll_write_packet(cx))?;
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_flush(cx))?;
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S> std::fmt::Debug for Secio1Stream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secio1Stream")
            .field("buffered", &self.read_buf.len())
            .field("staged", &self.stage.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernet_crypto::stretch_keys;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn pair() -> (Secio1Stream<DuplexStream>, Secio1Stream<DuplexStream>) {
        let (k1, k2) = stretch_keys(CipherKind::Aes256, HashKind::Sha256, &[7u8; 32]).unwrap();
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Secio1Stream::new(a, CipherKind::Aes256, HashKind::Sha256, &k1, &k2).unwrap(),
            Secio1Stream::new(b, CipherKind::Aes256, HashKind::Sha256, &k2, &k1).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_secured_data_flows_both_ways() {
        let (mut a, mut b) = pair();
        a.write_all(b"over the wire").await.unwrap();
        a.flush().await.unwrap();
        let mut buf = [0u8; 13];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"over the wire");

        b.write_all(b"and back").await.unwrap();
        b.flush().await.unwrap();
        let mut buf = [0u8; 8];
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"and back");
    }

    #[tokio::test]
    async fn test_one_packet_per_flush() {
        let (k1, k2) = stretch_keys(CipherKind::Aes128, HashKind::Sha256, &[1u8; 32]).unwrap();
        let (a, mut raw) = tokio::io::duplex(4096);
        let mut a = Secio1Stream::new(a, CipherKind::Aes128, HashKind::Sha256, &k1, &k2).unwrap();
        a.write_all(b"ab").await.unwrap();
        a.write_all(b"cd").await.unwrap();
        a.flush().await.unwrap();
        drop(a);

        let mut wire = Vec::new();
        raw.read_to_end(&mut wire).await.unwrap();
        // Length prefix, four ciphertext bytes and a 32-byte SHA256 tag.
        assert_eq!(wire.len(), 4 + 4 + 32);
        assert_eq!(&wire[..4], &36u32.to_be_bytes());
        assert_ne!(&wire[4..8], b"abcd");
    }

    #[tokio::test]
    async fn test_tampered_packet_rejected() {
        let (k1, k2) = stretch_keys(CipherKind::Aes256, HashKind::Sha256, &[9u8; 32]).unwrap();
        let (a, mut raw) = tokio::io::duplex(4096);
        let mut a = Secio1Stream::new(a, CipherKind::Aes256, HashKind::Sha256, &k1, &k2).unwrap();
        a.write_all(b"payload").await.unwrap();
        a.flush().await.unwrap();
        drop(a);
        let mut wire = Vec::new();
        raw.read_to_end(&mut wire).await.unwrap();
        wire[5] ^= 0x01;

        let (c, mut feed) = tokio::io::duplex(4096);
        feed.write_all(&wire).await.unwrap();
        drop(feed);
        let mut b = Secio1Stream::new(c, CipherKind::Aes256, HashKind::Sha256, &k2, &k1).unwrap();
        let mut buf = Vec::new();
        let err = b.read_to_end(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_short_length_rejected() {
        let (k1, k2) = stretch_keys(CipherKind::Blowfish, HashKind::Sha512, &[3u8; 32]).unwrap();
        let (c, mut feed) = tokio::io::duplex(4096);
        // Length equal to the mac size leaves no room for ciphertext.
        feed.write_all(&64u32.to_be_bytes()).await.unwrap();
        feed.write_all(&[0u8; 64]).await.unwrap();
        drop(feed);
        let mut b = Secio1Stream::new(c, CipherKind::Blowfish, HashKind::Sha512, &k2, &k1).unwrap();
        let mut buf = [0u8; 8];
        let err = b.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_clean_eof_between_packets() {
        let (mut a, mut b) = pair();
        a.write_all(b"x").await.unwrap();
        a.shutdown().await.unwrap();
        drop(a);
        let mut received = Vec::new();
        b.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"x");
    }
}
