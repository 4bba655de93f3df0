//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable (TCP) channel with length-prefixed frames.
//! - Wrap game messages in a small versioned envelope.
//! - Keep serialization explicit: a frame is a big-endian `u32` length
//!   followed by a JSON payload.
//!
//! Connections split into a read half and a write half so the server can run
//! one reader task and one writer task per client.

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::protocol::{ClientMsg, ServerMsg};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame payload.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Identifies a client slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello { protocol: u32 },
    Welcome { client_id: ClientId },
    /// Map the server is running; clients send `StartInfo` after this.
    MapInfo { name: String },
    /// Client finished loading and wants to join the game.
    EnterGame,

    // ─── Gameplay ───
    /// Client -> server game message.
    Client(ClientMsg),
    /// Server -> client game message.
    Server(ServerMsg),

    // ─── Disconnect ───
    Disconnect { reason: String },
}

/// Encodes one frame: length prefix plus JSON payload.
pub fn encode_frame(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    if payload.len() > MAX_FRAME_BYTES {
        bail!("frame too large: {} bytes", payload.len());
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> anyhow::Result<NetMsg> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        bail!("frame too large: {len} bytes");
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    decode_from_bytes(&payload)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let frame = encode_frame(msg)?;
        self.stream.write_all(&frame).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (FrameReader { read }, FrameWriter { write })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    read: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.read).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    write: OwnedWriteHalf,
}

impl FrameWriter {
    /// Writes a pre-encoded frame.
    pub async fn send_frame(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        self.write.write_all(frame).await.context("tcp write")?;
        Ok(())
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let frame = encode_frame(msg)?;
        self.send_frame(&frame).await
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChatMode;

    #[test]
    fn frame_has_length_prefix() {
        let msg = NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
        };
        let frame = encode_frame(&msg).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(decode_from_bytes(&frame[4..]).unwrap(), msg);
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(decode_from_bytes(b"{not json").is_err());
    }

    #[tokio::test]
    async fn split_halves_exchange_frames() -> anyhow::Result<()> {
        let listener = ReliableListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;

        let client = tokio::spawn(async move {
            let mut conn = ReliableConn::connect(addr).await?;
            conn.send(&NetMsg::Client(ClientMsg::Say {
                mode: ChatMode::All,
                target: None,
                message: "hi".into(),
            }))
            .await?;
            conn.recv().await
        });

        let (conn, _) = listener.accept().await?;
        let (mut reader, mut writer) = conn.into_split();
        let got = reader.recv().await?;
        assert!(matches!(got, NetMsg::Client(ClientMsg::Say { .. })));
        writer
            .send(&NetMsg::Welcome {
                client_id: ClientId(7),
            })
            .await?;

        let reply = client.await??;
        assert_eq!(
            reply,
            NetMsg::Welcome {
                client_id: ClientId(7)
            }
        );
        Ok(())
    }
}
