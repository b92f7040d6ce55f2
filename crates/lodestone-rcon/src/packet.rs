//! Wire format of the remote console protocol.
//!
//! Every packet is framed as
//!
//! ```text
//! [length: i32 LE][request id: i32 LE][type: i32 LE][body ..][0x00][0x00]
//! ```
//!
//! where `length` counts every byte after itself. The body is text that is
//! not guaranteed to be valid UTF-8, so it is kept as raw bytes and decoded
//! lossily by the caller.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RconError, Result};

/// Login request.
pub const SERVERDATA_AUTH: i32 = 3;
/// Reply to a login request. Shares its value with [`SERVERDATA_EXECCOMMAND`].
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
/// Command request.
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
/// Command output.
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id the server uses to signal a rejected password.
pub const AUTH_FAILED_ID: i32 = -1;

/// Smallest valid `length`: id, type and the two terminating NULs.
pub const MIN_FRAME_LEN: usize = 10;
/// Largest `length` accepted from a server.
pub const MAX_FRAME_LEN: usize = 8192;
/// Longest command body the game server accepts.
pub const MAX_COMMAND_LEN: usize = 1446;

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Correlation id chosen by the client and echoed by the server.
    pub id: i32,
    /// Packet type.
    pub kind: i32,
    /// Body without its terminating NULs.
    pub body: Vec<u8>,
}

impl Packet {
    /// Build a packet.
    pub fn new(id: i32, kind: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    /// Encode the packet including its length prefix.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the packet would exceed the frame limit.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let frame_len = MIN_FRAME_LEN + self.body.len();
        if frame_len > MAX_FRAME_LEN {
            return Err(RconError::Protocol(format!(
                "packet of {frame_len} bytes exceeds {MAX_FRAME_LEN}"
            )));
        }
        let length = i32::try_from(frame_len)
            .map_err(|_| RconError::Protocol("packet length overflow".into()))?;

        let mut buf = Vec::with_capacity(4 + frame_len);
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(&self.body);
        buf.extend_from_slice(&[0, 0]);
        Ok(buf)
    }

    /// Decode a frame (the bytes following the length prefix).
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is too short or not terminated
    /// by two NUL bytes.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(RconError::Protocol(format!(
                "frame of {} bytes is shorter than {MIN_FRAME_LEN}",
                frame.len()
            )));
        }
        let (header, rest) = frame.split_at(8);
        let (body, terminator) = rest.split_at(rest.len() - 2);
        if terminator != [0, 0] {
            return Err(RconError::Protocol("frame is not NUL terminated".into()));
        }
        Ok(Self {
            id: read_i32(&header[0..4]),
            kind: read_i32(&header[4..8]),
            body: body.to_vec(),
        })
    }
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    i32::from_le_bytes(raw)
}

/// Read one packet from `reader`.
///
/// # Errors
///
/// Returns a protocol error for an out-of-range length prefix and an I/O
/// error if the stream ends mid-packet.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let length = i32::from_le_bytes(prefix);

    let frame_len = usize::try_from(length)
        .ok()
        .filter(|len| (MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(len))
        .ok_or_else(|| RconError::Protocol(format!("invalid packet length {length}")))?;

    let mut frame = vec![0u8; frame_len];
    reader.read_exact(&mut frame).await?;
    Packet::decode(&frame)
}

/// Write one packet to `writer` and flush it.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> Result<()> {
    let bytes = packet.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
