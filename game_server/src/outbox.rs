//! Outbound message queue.
//!
//! Game code never touches sockets. Everything it wants to send is queued
//! here and flushed by the network layer after the tick.

use game_shared::{
    net::ClientId,
    protocol::{ChatMode, ServerMsg},
};
use tracing::info;

/// Who receives a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Client(ClientId),
    /// Every client that has entered the game.
    All,
    /// Demo recorder only.
    Demo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Message { to: Recipient, msg: ServerMsg },
    /// Close the client's connection after flushing what precedes it.
    Disconnect { client: ClientId, reason: String },
}

#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Outgoing>,
}

impl Outbox {
    pub fn send(&mut self, to: Recipient, msg: ServerMsg) {
        self.queue.push(Outgoing::Message { to, msg });
    }

    pub fn disconnect(&mut self, client: ClientId, reason: impl Into<String>) {
        self.queue.push(Outgoing::Disconnect {
            client,
            reason: reason.into(),
        });
    }

    /// Server chat line to everyone, logged like any other chat.
    pub fn chat_all(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!(scope = "chat", "*** {}", text);
        self.send(
            Recipient::All,
            ServerMsg::Chat {
                mode: ChatMode::All,
                client_id: None,
                target_id: None,
                message: text,
            },
        );
    }

    /// Server chat line to one client.
    pub fn chat_to(&mut self, cid: ClientId, text: impl Into<String>) {
        self.send(
            Recipient::Client(cid),
            ServerMsg::Chat {
                mode: ChatMode::All,
                client_id: None,
                target_id: None,
                message: text.into(),
            },
        );
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outgoing> {
        self.queue.iter()
    }

    /// Messages a given client would receive, in queue order.
    pub fn messages_for(&self, cid: ClientId) -> impl Iterator<Item = &ServerMsg> {
        self.queue.iter().filter_map(move |out| match out {
            Outgoing::Message {
                to: Recipient::Client(id),
                msg,
            } if *id == cid => Some(msg),
            Outgoing::Message {
                to: Recipient::All,
                msg,
            } => Some(msg),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Outgoing> {
        self.queue.drain(..)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
