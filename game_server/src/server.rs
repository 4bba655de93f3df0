//! Network front of the game context.
//!
//! The server owns a [`GameContext`] and drives it at a fixed tick rate:
//! - an accept task runs the `Hello` handshake and hands connections over
//! - every client gets one reader task and one writer task
//! - each step drains console input and inbound messages, ticks the game,
//!   sends snapshots and flushes the outbox
//!
//! Slots are assigned here; the context only ever sees client ids.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use bytes::Bytes;
use game_shared::{
    config::ServerConfig,
    net::{
        encode_frame, ClientId, FrameReader, FrameWriter, NetMsg, ReliableConn, ReliableListener,
        PROTOCOL_VERSION,
    },
    protocol::ServerMsg,
    snapshot::Snapshot,
    MAX_CLIENTS,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    context::GameContext,
    outbox::{Outgoing, Recipient},
};

/// How long a fresh connection may take to say `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// What the demo recorder receives.
#[derive(Debug, Clone, PartialEq)]
pub enum DemoFrame {
    Message(ServerMsg),
    Snapshot(Snapshot),
}

/// Events from the accept task and the per-client reader tasks.
enum NetEvent {
    Connected {
        conn: ReliableConn,
        peer: SocketAddr,
    },
    Message {
        cid: ClientId,
        conn_id: u64,
        msg: NetMsg,
    },
    Closed {
        cid: ClientId,
        conn_id: u64,
        reason: String,
    },
}

/// A connected client.
struct ClientConn {
    /// Tells this connection apart from earlier ones in the same slot.
    conn_id: u64,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
}

pub struct GameServer {
    pub cfg: ServerConfig,
    ctx: GameContext,
    listener: Arc<ReliableListener>,
    clients: HashMap<ClientId, ClientConn>,
    next_conn_id: u64,

    events_tx: mpsc::UnboundedSender<NetEvent>,
    events_rx: mpsc::UnboundedReceiver<NetEvent>,
    accepting: bool,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
    demo: Option<mpsc::UnboundedSender<DemoFrame>>,
}

impl GameServer {
    /// Binds the listener and builds the game from `cfg`.
    pub async fn new(cfg: ServerConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;
        let ctx = GameContext::new(cfg.game.clone(), u64::from(cfg.tick_hz.max(1)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            cfg,
            ctx,
            listener: Arc::new(listener),
            clients: HashMap::new(),
            next_conn_id: 0,
            events_tx,
            events_rx,
            accepting: false,
            console_rx: None,
            demo: None,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &GameContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut GameContext {
        &mut self.ctx
    }

    /// Number of open client connections.
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Starts feeding a demo recorder with everything sent to the shared
    /// view.
    pub fn start_recording(&mut self) -> mpsc::UnboundedReceiver<DemoFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.demo = Some(tx);
        self.ctx.set_recording(true);
        info!(scope = "server", "demo recording started");
        rx
    }

    pub fn stop_recording(&mut self) {
        self.demo = None;
        self.ctx.set_recording(false);
    }

    /// Runs the server for a number of ticks at the configured rate.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz.max(1) as f32);
        let mut next = Instant::now();
        for _ in 0..ticks {
            next += dt;
            self.step().await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Runs until the process is stopped.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz.max(1) as f32);
        let mut interval = tokio::time::interval(dt);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.step().await?;
        }
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        self.ensure_accepting();
        self.process_console_commands();
        self.process_net_events();
        self.retry_pending_drops();

        self.ctx.on_tick();
        self.send_snapshots();
        self.ctx.post_snap();
        self.flush_outbox();

        if let Some(map) = self.ctx.controller.take_map_change() {
            self.change_map(&map);
        }
        Ok(())
    }

    fn ensure_accepting(&mut self) {
        if self.accepting {
            return;
        }
        self.accepting = true;
        let listener = Arc::clone(&self.listener);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            loop {
                let (conn, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = handshake(conn, peer, events).await {
                        debug!(%peer, error = %e, "handshake failed");
                    }
                });
            }
        });
    }

    fn process_console_commands(&mut self) {
        let Some(rx) = self.console_rx.as_mut() else {
            return;
        };
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        for line in lines {
            self.ctx.exec_console(&line);
        }
    }

    fn process_net_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                NetEvent::Connected { conn, peer } => self.on_connected(conn, peer),
                NetEvent::Message { cid, conn_id, msg } => {
                    if self.is_current(cid, conn_id) {
                        self.on_net_message(cid, msg);
                    }
                }
                NetEvent::Closed {
                    cid,
                    conn_id,
                    reason,
                } => {
                    if self.is_current(cid, conn_id) {
                        self.clients.remove(&cid);
                        self.drop_player(cid, &reason);
                    }
                }
            }
        }
    }

    fn is_current(&self, cid: ClientId, conn_id: u64) -> bool {
        self.clients.get(&cid).is_some_and(|c| c.conn_id == conn_id)
    }

    /// Slot for a new connection: free of connections and of players still
    /// waiting to leave. Dummies give way.
    fn free_slot(&self) -> Option<ClientId> {
        let max = (self.ctx.config.sv_max_clients.max(0) as usize).min(MAX_CLIENTS);
        (0..max as u32).map(ClientId).find(|cid| {
            !self.clients.contains_key(cid) && self.ctx.player(*cid).map_or(true, |p| p.dummy)
        })
    }

    fn on_connected(&mut self, conn: ReliableConn, peer: SocketAddr) {
        if let Some(ban) = self.ctx.bans().find(peer.ip()) {
            let reason = match ban.minutes_left(chrono::Utc::now()) {
                Some(m) => format!("You have been banned for {} minutes ({})", m, ban.reason),
                None => format!("You have been banned for life ({})", ban.reason),
            };
            info!(scope = "server", %peer, "refused banned address");
            refuse(conn, reason);
            return;
        }
        let Some(cid) = self.free_slot() else {
            refuse(conn, "This server is full".to_string());
            return;
        };

        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        let (reader, writer) = conn.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, rx));
        tokio::spawn(read_loop(reader, cid, conn_id, self.events_tx.clone()));

        self.clients.insert(cid, ClientConn { conn_id, peer, tx });
        self.send_net(cid, &NetMsg::Welcome { client_id: cid });
        self.send_map_info(cid);
        self.ctx.on_client_connected(cid, Some(peer.ip()), false, false);
        info!(scope = "server", client_id = %cid, %peer, "player has entered the server");
    }

    fn on_net_message(&mut self, cid: ClientId, msg: NetMsg) {
        match msg {
            NetMsg::Client(msg) => self.ctx.on_message(cid, msg),
            NetMsg::EnterGame => {
                if self.ctx.player(cid).is_some_and(|p| p.ready_to_enter) {
                    self.ctx.on_client_enter(cid);
                    info!(scope = "server", client_id = %cid, "player has entered the game");
                }
            }
            NetMsg::Disconnect { reason } => {
                self.clients.remove(&cid);
                self.drop_player(cid, &reason);
            }
            other => debug!(client_id = %cid, ?other, "unexpected message"),
        }
    }

    /// Removes the player; a refused drop is retried every step.
    fn drop_player(&mut self, cid: ClientId, reason: &str) {
        if !self.ctx.on_client_drop(cid, reason, false) {
            self.ctx.pending_drops.push((cid, reason.to_string()));
        }
    }

    fn retry_pending_drops(&mut self) {
        for (cid, reason) in self.ctx.take_pending_drops() {
            if self.clients.contains_key(&cid) {
                continue;
            }
            self.drop_player(cid, &reason);
        }
    }

    fn send_map_info(&mut self, cid: ClientId) {
        let name = self.ctx.config.sv_map.clone();
        self.send_net(cid, &NetMsg::MapInfo { name });
    }

    fn send_net(&mut self, cid: ClientId, msg: &NetMsg) {
        let frame = match encode_frame(msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client_id = %cid, error = %e, "dropping unencodable message");
                return;
            }
        };
        if let Some(client) = self.clients.get(&cid) {
            // The writer is gone once the socket closed; the reader reports it.
            let _ = client.tx.send(frame);
        }
    }

    fn send_snapshots(&mut self) {
        let viewers: Vec<ClientId> = self
            .clients
            .keys()
            .copied()
            .filter(|cid| self.ctx.player(*cid).is_some_and(|p| p.ingame))
            .collect();
        for cid in viewers {
            let snap = self.ctx.snapshot(Some(cid));
            self.send_net(cid, &NetMsg::Server(ServerMsg::Snapshot(snap)));
        }
        if self.demo.is_some() {
            let snap = self.ctx.snapshot(None);
            self.record(DemoFrame::Snapshot(snap));
        }
    }

    fn record(&mut self, frame: DemoFrame) {
        let closed = self
            .demo
            .as_ref()
            .is_some_and(|demo| demo.send(frame).is_err());
        if closed {
            warn!(scope = "server", "demo recorder went away");
            self.stop_recording();
        }
    }

    fn flush_outbox(&mut self) {
        for out in self.ctx.drain_outgoing() {
            match out {
                Outgoing::Message {
                    to: Recipient::Client(cid),
                    msg,
                } => self.send_net(cid, &NetMsg::Server(msg)),
                Outgoing::Message {
                    to: Recipient::All,
                    msg,
                } => {
                    let targets: Vec<ClientId> = self
                        .clients
                        .keys()
                        .copied()
                        .filter(|cid| self.ctx.player(*cid).is_some_and(|p| p.ingame))
                        .collect();
                    let msg = NetMsg::Server(msg);
                    for cid in targets {
                        self.send_net(cid, &msg);
                    }
                    if self.demo.is_some() {
                        if let NetMsg::Server(msg) = msg {
                            self.record(DemoFrame::Message(msg));
                        }
                    }
                }
                Outgoing::Message {
                    to: Recipient::Demo,
                    msg,
                } => {
                    if self.demo.is_some() {
                        self.record(DemoFrame::Message(msg));
                    }
                }
                Outgoing::Disconnect { client, reason } => {
                    self.send_net(client, &NetMsg::Disconnect { reason: reason.clone() });
                    if let Some(conn) = self.clients.remove(&client) {
                        info!(scope = "server", client_id = %client, peer = %conn.peer, %reason, "client disconnected");
                    }
                }
            }
        }
    }

    /// Loads `map`: everything queued goes out first, then the game is
    /// rebuilt and every connected client is sent the new map.
    fn change_map(&mut self, map: &str) {
        self.flush_outbox();
        info!(scope = "server", map, "changing map");
        self.ctx.config.sv_map = map.to_string();
        self.ctx.reset();
        let connected: Vec<ClientId> = self.clients.keys().copied().collect();
        for cid in connected {
            self.send_map_info(cid);
        }
        self.flush_outbox();
    }
}

/// Waits for `Hello` and hands the connection to the server loop.
async fn handshake(
    mut conn: ReliableConn,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<NetEvent>,
) -> anyhow::Result<()> {
    let msg = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv())
        .await
        .context("handshake timed out")??;
    match msg {
        NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {
            events
                .send(NetEvent::Connected { conn, peer })
                .map_err(|_| anyhow::anyhow!("server loop stopped"))?;
            Ok(())
        }
        NetMsg::Hello { protocol } => {
            conn.send(&NetMsg::Disconnect {
                reason: format!("wrong protocol version {protocol}, expected {PROTOCOL_VERSION}"),
            })
            .await?;
            anyhow::bail!("protocol mismatch: {protocol}")
        }
        other => anyhow::bail!("unexpected handshake msg: {other:?}"),
    }
}

/// Sends a reason and closes the connection.
fn refuse(mut conn: ReliableConn, reason: String) {
    tokio::spawn(async move {
        if let Err(e) = conn.send(&NetMsg::Disconnect { reason }).await {
            debug!(error = %e, "refusal not delivered");
        }
    });
}

async fn read_loop(
    mut reader: FrameReader,
    cid: ClientId,
    conn_id: u64,
    events: mpsc::UnboundedSender<NetEvent>,
) {
    loop {
        match reader.recv().await {
            Ok(msg) => {
                if events.send(NetEvent::Message { cid, conn_id, msg }).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(client_id = %cid, error = %e, "connection closed");
                let _ = events.send(NetEvent::Closed {
                    cid,
                    conn_id,
                    reason: "connection closed".to_string(),
                });
                return;
            }
        }
    }
}

async fn write_loop(mut writer: FrameWriter, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.send_frame(&frame).await {
            debug!(error = %e, "write failed");
            return;
        }
    }
}

/// Helper for tests: a server on an ephemeral localhost port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, ServerConfig)> {
    let mut cfg = ServerConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };
    let mut server = GameServer::new(cfg.clone()).await?;
    cfg.server_addr = server.local_addr()?.to_string();
    server.cfg.server_addr = cfg.server_addr.clone();
    Ok((server, cfg))
}
