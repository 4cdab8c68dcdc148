//! Zapgate IPC
//!
//! Event bus between the chat adapter and the command core

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One message received from the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    pub sender_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    /// True for one-on-one chats. Group traffic is carried but never acted on.
    pub private: bool,
}

/// One message the core wants delivered back to a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i64>,
}

impl Reply {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

pub const INBOUND_CAPACITY: usize = 256;
pub const REPLY_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<Inbound>,
    replies: broadcast::Sender<Reply>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(INBOUND_CAPACITY);
        let (reply_tx, _) = broadcast::channel(REPLY_CAPACITY);

        Self {
            inbound: inbound_tx,
            replies: reply_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        self.inbound.subscribe()
    }

    pub fn publish(&self, msg: Inbound) -> anyhow::Result<()> {
        self.inbound.send(msg)?;
        Ok(())
    }

    pub fn reply_subscribe(&self) -> broadcast::Receiver<Reply> {
        self.replies.subscribe()
    }

    pub fn send_reply(&self, reply: Reply) -> anyhow::Result<()> {
        self.replies.send(reply)?;
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
