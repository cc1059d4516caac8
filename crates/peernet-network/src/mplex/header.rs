//! Mplex frame header and frame codec.
//!
//! A frame is `varint((stream_id << 3) | packet_type) ‖ varint(len) ‖ payload`.

use bytes::{BufMut, Bytes, BytesMut};
use peernet_core::message::{read_varint_async, MAX_VARINT_LEN};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::NetworkError;

/// Largest stream id that fits beside the three type bits in a u64.
pub const MAX_STREAM_ID: u64 = (1 << 60) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    NewStream = 0,
    MessageReceiver = 1,
    MessageInitiator = 2,
    CloseReceiver = 3,
    CloseInitiator = 4,
    ResetReceiver = 5,
    ResetInitiator = 6,
}

impl PacketType {
    pub const ALL: [PacketType; 7] = [
        PacketType::NewStream,
        PacketType::MessageReceiver,
        PacketType::MessageInitiator,
        PacketType::CloseReceiver,
        PacketType::CloseInitiator,
        PacketType::ResetReceiver,
        PacketType::ResetInitiator,
    ];

    pub fn is_message(&self) -> bool {
        matches!(self, PacketType::MessageReceiver | PacketType::MessageInitiator)
    }

    pub fn is_close(&self) -> bool {
        matches!(
            self,
            PacketType::CloseReceiver
                | PacketType::CloseInitiator
                | PacketType::ResetReceiver
                | PacketType::ResetInitiator
        )
    }
}

impl TryFrom<u8> for PacketType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PacketType::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| NetworkError::Framing(format!("unknown packet type {}", value)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub stream_id: u64,
    pub packet_type: PacketType,
}

impl Header {
    pub fn new(stream_id: u64, packet_type: PacketType) -> Self {
        Self {
            stream_id,
            packet_type,
        }
    }

    /// The packed value carried on the wire.
    pub fn to_u64(&self) -> Result<u64, NetworkError> {
        if self.stream_id > MAX_STREAM_ID {
            return Err(NetworkError::Framing(format!(
                "stream id {} exceeds {}",
                self.stream_id, MAX_STREAM_ID
            )));
        }
        Ok((self.stream_id << 3) | self.packet_type as u64)
    }

    pub fn from_u64(value: u64) -> Result<Self, NetworkError> {
        Ok(Self {
            stream_id: value >> 3,
            packet_type: PacketType::try_from((value & 0x07) as u8)?,
        })
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream_id: u64, packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            header: Header::new(stream_id, packet_type),
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Result<BytesMut, NetworkError> {
        let mut buf = BytesMut::with_capacity(2 * MAX_VARINT_LEN + self.payload.len());
        prost::encoding::encode_varint(self.header.to_u64()?, &mut buf);
        prost::encoding::encode_varint(self.payload.len() as u64, &mut buf);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Read one frame, rejecting payloads larger than `max_size`.
    pub async fn read<R: AsyncRead + Unpin>(
        reader: &mut R,
        max_size: usize,
    ) -> Result<Self, NetworkError> {
        let header = Header::from_u64(read_varint_async(reader).await?)?;
        let len = match read_varint_async(reader).await {
            Ok(len) => len,
            Err(e) if e.is_closed() => {
                return Err(NetworkError::Framing("stream ended after header".into()))
            }
            Err(e) => return Err(e.into()),
        };
        if len > max_size as u64 {
            return Err(NetworkError::Framing(format!(
                "frame of {} bytes exceeds limit of {}",
                len, max_size
            )));
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => NetworkError::Framing("truncated frame".into()),
            _ => NetworkError::Io(e),
        })?;
        Ok(Self {
            header,
            payload: payload.into(),
        })
    }
}
