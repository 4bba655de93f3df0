//! Shared helpers for the integration tests.
//!
//! Two flavours: in-process helpers that drive a [`GameContext`] directly,
//! and [`TestClient`], a minimal socket client for a running
//! [`game_server::GameServer`].

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{bail, Context};
use game_server::{outbox::Outgoing, GameContext};
use game_shared::{
    config::GameConfig,
    net::{ClientId, NetMsg, ReliableConn, PROTOCOL_VERSION},
    protocol::{ClientMsg, ServerMsg, SkinInfo},
};
use tracing::debug;

/// How long socket helpers wait for a frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Deterministic context at 50 ticks per second.
pub fn context(config: GameConfig) -> GameContext {
    GameContext::with_seed(config, 50, 0x5eed)
}

/// Connects `id` from 10.0.0.`id+1`, finishes the handshake and enters the
/// game, the way the network layer would.
pub fn join(ctx: &mut GameContext, id: u32, name: &str) -> ClientId {
    let cid = ClientId(id);
    let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, id as u8 + 1));
    ctx.on_client_connected(cid, Some(addr), false, false);
    ctx.on_message(cid, start_info(name));
    ctx.on_client_enter(cid);
    cid
}

pub fn start_info(name: &str) -> ClientMsg {
    ClientMsg::StartInfo {
        name: name.to_string(),
        clan: String::new(),
        country: -1,
        skin: SkinInfo::default(),
    }
}

pub fn call_vote(kind: &str, value: &str) -> ClientMsg {
    ClientMsg::CallVote {
        kind: kind.to_string(),
        value: value.to_string(),
        reason: String::new(),
        force: false,
    }
}

/// Chat lines queued for `cid`, including broadcasts to everyone.
pub fn chat_lines(ctx: &GameContext, cid: ClientId) -> Vec<String> {
    ctx.outbox()
        .messages_for(cid)
        .filter_map(|m| match m {
            ServerMsg::Chat { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Every queued server message, whoever it is for.
pub fn queued_messages(ctx: &GameContext) -> Vec<ServerMsg> {
    ctx.outbox()
        .iter()
        .filter_map(|o| match o {
            Outgoing::Message { msg, .. } => Some(msg.clone()),
            Outgoing::Disconnect { .. } => None,
        })
        .collect()
}

/// Runs `n` ticks.
pub fn run_ticks(ctx: &mut GameContext, n: u64) {
    for _ in 0..n {
        ctx.on_tick();
    }
}

/// Socket client speaking the server handshake.
pub struct TestClient {
    pub conn: ReliableConn,
    pub client_id: ClientId,
    pub map: String,
}

impl TestClient {
    /// Says `Hello` and waits for `Welcome` and `MapInfo`. The server must
    /// be stepping meanwhile.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let mut conn = ReliableConn::connect(addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
        })
        .await?;
        let client_id = match recv(&mut conn).await? {
            NetMsg::Welcome { client_id } => client_id,
            other => bail!("expected Welcome, got {other:?}"),
        };
        let map = match recv(&mut conn).await? {
            NetMsg::MapInfo { name } => name,
            other => bail!("expected MapInfo, got {other:?}"),
        };
        debug!(client_id = %client_id, %map, "test client connected");
        Ok(Self {
            conn,
            client_id,
            map,
        })
    }

    /// Sends `StartInfo`, waits for `ReadyToEnter`, then enters.
    pub async fn enter(&mut self, name: &str) -> anyhow::Result<()> {
        self.conn.send(&NetMsg::Client(start_info(name))).await?;
        self.recv_until(|m| matches!(m, NetMsg::Server(ServerMsg::ReadyToEnter)))
            .await?;
        self.conn.send(&NetMsg::EnterGame).await
    }

    pub async fn send(&mut self, msg: ClientMsg) -> anyhow::Result<()> {
        self.conn.send(&NetMsg::Client(msg)).await
    }

    /// Skips frames until one matches.
    pub async fn recv_until<F>(&mut self, mut pred: F) -> anyhow::Result<NetMsg>
    where
        F: FnMut(&NetMsg) -> bool,
    {
        loop {
            let msg = recv(&mut self.conn).await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }
}

async fn recv(conn: &mut ReliableConn) -> anyhow::Result<NetMsg> {
    tokio::time::timeout(RECV_TIMEOUT, conn.recv())
        .await
        .context("timed out waiting for a frame")?
}
