//! Envelope wire format
//!
//! Every unit on a cluster link is an [`Envelope`]: a kind identifier, an
//! exchange discriminant (fire-and-forget, request or reply), and an opaque
//! payload. Frames on the wire are a 4-byte big-endian length prefix followed
//! by the bincode-encoded envelope.

use crate::error::{NetworkError, Result};
use crosslink_topology::PeerIdentity;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Correlation id of an in-flight call, unique per session while pending
pub type CallId = u64;

/// Maximum frame body size (1MB); larger frames are a protocol violation
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Control-plane envelope kinds. Application handlers register at
/// [`kind::APP_BASE`] and above.
pub mod kind {
    /// Registration handshake request/response
    pub const REGISTER: u16 = 1;
    /// Heartbeat ping/pong
    pub const HEARTBEAT: u16 = 2;
    /// First kind identifier available to application handlers
    pub const APP_BASE: u16 = 16;
}

/// How an envelope participates in request/response correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exchange {
    /// Fire-and-forget; never correlated
    Notify,
    /// Opens a call; the receiver echoes the id in its reply
    Request(CallId),
    /// Closes a call; consumed by the matching pending-call slot
    Reply(CallId),
}

/// One transmitted unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: u16,
    pub exchange: Exchange,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn notify(kind: u16, payload: Vec<u8>) -> Self {
        Self {
            kind,
            exchange: Exchange::Notify,
            payload,
        }
    }

    pub fn request(kind: u16, call: CallId, payload: Vec<u8>) -> Self {
        Self {
            kind,
            exchange: Exchange::Request(call),
            payload,
        }
    }

    pub fn reply(kind: u16, call: CallId, payload: Vec<u8>) -> Self {
        Self {
            kind,
            exchange: Exchange::Reply(call),
            payload,
        }
    }

    /// Decode the payload as a typed message
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}

/// Encode a typed message for use as an envelope payload
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Write one length-prefixed envelope frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    let body = bincode::serialize(envelope)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(NetworkError::frame(format!(
            "frame size {} exceeds maximum {}",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed envelope frame
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;

    let body_len = u32::from_be_bytes(len_bytes) as usize;
    if body_len > MAX_FRAME_SIZE {
        return Err(NetworkError::frame(format!(
            "frame size {} exceeds maximum {}",
            body_len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}

// Control-plane payloads. Both directions of registration and heartbeat carry
// the full sender identity.

/// Registration request from the dialing side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub identity: PeerIdentity,
}

/// Registration acknowledgment from the accepting side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub identity: PeerIdentity,
}

/// Heartbeat ping from the dialing side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub identity: PeerIdentity,
}

/// Heartbeat pong from the accepting side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub identity: PeerIdentity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosslink_topology::Role;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let ping = Ping {
            identity: PeerIdentity::new(Role::Zone, 2, 0),
        };
        let sent = Envelope::request(kind::HEARTBEAT, 7, encode(&ping).unwrap());
        write_frame(&mut client, &sent).await.unwrap();

        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(received, sent);
        assert_eq!(received.decode::<Ping>().unwrap(), ping);
    }

    #[tokio::test]
    async fn test_notify_carries_no_correlation() {
        let envelope = Envelope::notify(kind::APP_BASE, vec![1, 2, 3]);
        assert_eq!(envelope.exchange, Exchange::Notify);
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected_on_write() {
        let (mut client, _server) = tokio::io::duplex(64);
        let envelope = Envelope::notify(kind::APP_BASE, vec![0u8; MAX_FRAME_SIZE + 1]);
        let err = write_frame(&mut client, &envelope).await.unwrap_err();
        assert_eq!(err.category(), "frame");
    }

    #[tokio::test]
    async fn test_oversize_length_prefix_rejected_on_read() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.category(), "frame");
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&8u32.to_be_bytes()).await.unwrap();
        client.write_all(&[1, 2, 3]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.category(), "io");
    }
}
