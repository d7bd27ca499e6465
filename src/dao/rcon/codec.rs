//! Packet framing for the remote-console protocol.
//!
//! Every frame is `len:i32le | id:i32le | type:i32le | body | 0x00 0x00`, where
//! `len` counts everything after itself.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{RconError, RconResult};

/// Auth request sent by the client.
pub const PACKET_AUTH: i32 = 3;
/// Auth response sent by the server.
pub const PACKET_AUTH_RESPONSE: i32 = 2;
/// Command execution request.
pub const PACKET_EXEC: i32 = 2;
/// Command output.
pub const PACKET_RESPONSE: i32 = 0;
/// Request id the server echoes when authentication fails.
pub const AUTH_FAILED_ID: i32 = -1;
/// Largest command body the server accepts.
pub const MAX_COMMAND_LEN: usize = 1446;

const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 2;
const MIN_FRAME: i32 = (HEADER_LEN + TRAILER_LEN) as i32;
const MAX_FRAME: i32 = 4096 + MIN_FRAME;

/// A single decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Request id echoed back by the server.
    pub id: i32,
    /// Packet type.
    pub kind: i32,
    /// Payload text without the trailing nulls.
    pub body: String,
}

impl Packet {
    /// Build a packet.
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    /// Serialize the packet including its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let len = (HEADER_LEN + body.len() + TRAILER_LEN) as i32;
        let mut buf = Vec::with_capacity(4 + len as usize);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }
}

/// Read one frame from `reader`.
pub async fn read_packet<R>(reader: &mut R) -> RconResult<Packet>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_i32_le().await?;
    if !(MIN_FRAME..=MAX_FRAME).contains(&len) {
        return Err(RconError::Protocol(format!("frame length {len} out of range")));
    }

    let mut frame = vec![0u8; len as usize];
    reader.read_exact(&mut frame).await?;

    let id = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let kind = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let body_end = frame.len() - TRAILER_LEN;
    let body = String::from_utf8_lossy(&frame[HEADER_LEN..body_end]).into_owned();

    Ok(Packet { id, kind, body })
}

/// Write one frame to `writer` and flush it.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> RconResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}
